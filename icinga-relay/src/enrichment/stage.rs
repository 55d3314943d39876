use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Enricher, EnrichmentRegistry};
use crate::bus::{BusMessage, EventBus};
use crate::config::Subscription;
use crate::model::Envelope;

/// Turns `Received` events into `Event`s, enriching them on the way when the
/// originating subscription asks for it.
///
/// Enriched events are handled in their own task so a slow lookup never holds
/// up the bus. Events of the same type may therefore leave the stage in a
/// different order than they arrived.
pub struct EnrichmentStage {
    bus: EventBus,
    pipelines: HashMap<String, Arc<[Arc<dyn Enricher>]>>,
}

impl EnrichmentStage {
    pub fn new(bus: EventBus, registry: &EnrichmentRegistry, subscriptions: &[Subscription]) -> Self {
        let mut directives: HashMap<&str, Vec<String>> = HashMap::new();
        for subscription in subscriptions {
            let names = directives.entry(subscription.event.as_str()).or_default();
            for directive in &subscription.enrich {
                if !names.contains(directive) {
                    names.push(directive.clone());
                }
            }
        }

        let pipelines = directives
            .into_iter()
            .filter_map(|(event, names)| {
                let enrichers = registry.resolve(&names);
                if enrichers.is_empty() {
                    return None;
                }
                info!(event, enrichers = ?names, "Enrichment configured");
                Some((event.to_string(), Arc::from(enrichers)))
            })
            .collect();

        Self { bus, pipelines }
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
        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => break,

                message = receiver.recv() => match message {
                    Ok(BusMessage::Received(event)) => self.handle(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Enrichment stage lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("Enrichment stage stopped");
    }

    fn handle(&self, event: Arc<Envelope>) {
        let Some(pipeline) = self.pipelines.get(&event.event_type) else {
            self.bus.publish(BusMessage::Event(event));
            return;
        };

        let pipeline = pipeline.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut event = event;
            for enricher in pipeline.iter() {
                event = enricher.enrich(event).await;
            }
            bus.publish(BusMessage::Event(event));
        });
    }
}
