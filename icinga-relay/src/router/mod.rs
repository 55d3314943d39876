//! Routes ready events to output channels.

pub mod path;
mod rule;

pub use rule::RouteRule;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, EventBus};
use crate::channels::ChannelConfig;
use crate::config::RouteConfig;
use crate::model::Envelope;

pub struct EventRouter {
    bus: EventBus,
    rules: Vec<RouteRule>,
}

impl EventRouter {
    pub fn new(bus: EventBus, rules: Vec<RouteRule>) -> Self {
        Self { bus, rules }
    }

    /// Compile the configured routes. A route naming an unknown channel is
    /// reported and left out; the other routes still apply.
    pub fn from_config(
        bus: EventBus,
        routes: &[RouteConfig],
        channels: &BTreeMap<String, ChannelConfig>,
    ) -> Self {
        let rules = routes
            .iter()
            .filter_map(|route| {
                let Some(channel) = channels.get(&route.channel) else {
                    error!(
                        event = %route.event,
                        channel = %route.channel,
                        "Route references an unknown channel, skipping"
                    );
                    return None;
                };

                let rule = RouteRule::new(route, channel.append());
                info!(
                    event = %rule.event,
                    channel = %rule.channel,
                    append = %serde_json::Value::Object(rule.append().clone()),
                    "Route configured"
                );
                Some(rule)
            })
            .collect();

        Self::new(bus, rules)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Destinations of `event`: one `(channel, routed event)` per matching
    /// rule, in rule order.
    pub fn route(&self, event: &Envelope) -> Vec<(String, Envelope)> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(event))
            .map(|rule| (rule.channel.clone(), rule.apply(event)))
            .collect()
    }

    pub fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let receiver = self.bus.subscribe();
        tokio::spawn(self.run(receiver, cancellation_token))
    }

    async fn run(
        self,
        mut receiver: broadcast::Receiver<BusMessage>,
        cancellation_token: CancellationToken,
    ) {
        info!(rules = self.rules.len(), "Event router started");

        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => break,

                message = receiver.recv() => match message {
                    Ok(BusMessage::Event(event)) => self.dispatch(&event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event router lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("Event router stopped");
    }

    fn dispatch(&self, event: &Envelope) {
        for (channel, routed) in self.route(event) {
            info!(from = %event.event_type, to = %channel, "Routing event");
            self.bus.publish(BusMessage::Publish {
                channel,
                event: Arc::new(routed),
            });
        }
    }
}
