//! Output channels.
//!
//! Routed events are delivered through named channels:
//! - Generic webhooks (HTTP POST/PUT)
//! - The relay log
//!
//! Each channel may transform the event into a destination-specific payload
//! before delivery.

mod log;
mod transform;
mod webhook;

pub use self::log::{LogChannel, LogConfig};
pub use transform::{Transform, TransformContext};
pub use webhook::{WebhookAuth, WebhookChannel, WebhookConfig};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::bus::{BusMessage, EventBus};
use crate::model::Envelope;

/// Trait for output channels.
#[async_trait]
pub trait OutputChannel: Send + Sync {
    /// Configured channel name.
    fn name(&self) -> &str;

    /// Get the channel type name.
    fn kind(&self) -> &'static str;

    /// Deliver one routed event.
    async fn send(&self, event: &Envelope) -> Result<()>;
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Generic webhook channel.
    Webhook(WebhookConfig),
    /// Log channel.
    Log(LogConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Log(_) => "log",
        }
    }

    /// Base fields merged into every event routed to the channel.
    pub fn append(&self) -> &Map<String, Value> {
        match self {
            Self::Webhook(c) => &c.append,
            Self::Log(c) => &c.append,
        }
    }

    /// Build the channel. `downtime_event` is the event type the downtime
    /// monitor publishes under, needed by the transforms.
    pub fn build(&self, name: &str, downtime_event: &str) -> Result<Arc<dyn OutputChannel>> {
        let channel: Arc<dyn OutputChannel> = match self {
            Self::Webhook(c) => Arc::new(
                WebhookChannel::new(name, c.clone())?.with_downtime_event(downtime_event),
            ),
            Self::Log(c) => {
                Arc::new(LogChannel::new(name, c.clone()).with_downtime_event(downtime_event))
            }
        };
        Ok(channel)
    }
}

/// Channels by name.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn OutputChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured channel. A channel that fails to build is
    /// reported and left out.
    pub fn from_config(configs: &BTreeMap<String, ChannelConfig>, downtime_event: &str) -> Self {
        let mut registry = Self::new();
        for (name, config) in configs {
            match config.build(name, downtime_event) {
                Ok(channel) => {
                    info!(channel = %name, kind = config.kind(), "Output channel configured");
                    registry.register(channel);
                }
                Err(e) => error!(channel = %name, error = %e, "Invalid output channel, skipping"),
            }
        }
        registry
    }

    pub fn register(&mut self, channel: Arc<dyn OutputChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OutputChannel>> {
        self.channels.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Delivers `Publish` messages to their channel. Each delivery runs in its
/// own task; a failed delivery is logged and dropped.
pub struct ChannelDispatcher {
    bus: EventBus,
    registry: ChannelRegistry,
}

impl ChannelDispatcher {
    pub fn new(bus: EventBus, registry: ChannelRegistry) -> Self {
        Self { bus, registry }
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
                    Ok(BusMessage::Publish { channel, event }) => self.deliver(&channel, event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Channel dispatcher lagged, deliveries dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("Channel dispatcher stopped");
    }

    fn deliver(&self, name: &str, event: Arc<Envelope>) {
        let Some(channel) = self.registry.get(name) else {
            warn!(channel = %name, "No output channel with this name, dropping event");
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = channel.send(&event).await {
                error!(
                    channel = %channel.name(),
                    kind = channel.kind(),
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to deliver event"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use crate::config::DEFAULT_DOWNTIME_EVENT;
    use serde_json::json;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl OutputChannel for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        async fn send(&self, event: &Envelope) -> Result<()> {
            self.sent.lock().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_channel_config_shapes() {
        let configs: BTreeMap<String, ChannelConfig> = toml::from_str(
            r##"
[ops]
type = "webhook"
url = "http://hubot.local/hubot/slack"
transform = "hubot-slack"
slack_project = "team"
append = { channels = ["#ops"] }

[audit]
type = "log"
"##,
        )
        .unwrap();

        let ops = &configs["ops"];
        assert_eq!(ops.kind(), "webhook");
        assert_eq!(ops.append()["channels"], json!(["#ops"]));
        let ChannelConfig::Webhook(webhook) = ops else {
            panic!("expected webhook");
        };
        assert_eq!(webhook.transform, Transform::HubotSlack);
        assert_eq!(webhook.method, "POST");

        assert_eq!(configs["audit"].kind(), "log");
        assert!(configs["audit"].append().is_empty());

        let registry = ChannelRegistry::from_config(&configs, DEFAULT_DOWNTIME_EVENT);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("ops").unwrap().kind(), "webhook");
    }

    #[test]
    fn test_invalid_channel_is_skipped() {
        let configs: BTreeMap<String, ChannelConfig> = toml::from_str(
            r#"
[broken]
type = "webhook"
url = ""

[audit]
type = "log"
"#,
        )
        .unwrap();

        let registry = ChannelRegistry::from_config(&configs, DEFAULT_DOWNTIME_EVENT);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("broken").is_none());
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_to_named_channel() {
        let bus = EventBus::new();
        let recording = Arc::new(Recording::default());
        let mut registry = ChannelRegistry::new();
        registry.register(recording.clone());

        ChannelDispatcher::new(bus.clone(), registry).spawn(CancellationToken::new());

        let event = Arc::new(Envelope::new("status-change", json!({"n": 1})));
        bus.publish(BusMessage::Publish {
            channel: "missing".to_string(),
            event: event.clone(),
        });
        bus.publish(BusMessage::Publish {
            channel: "recording".to_string(),
            event,
        });

        for _ in 0..100 {
            if !recording.sent.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let sent = recording.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_log_channel_send() {
        let channel = ChannelConfig::Log(LogConfig::default())
            .build("audit", DEFAULT_DOWNTIME_EVENT)
            .unwrap();
        assert_eq!(channel.name(), "audit");
        channel
            .send(&Envelope::new("status-change", json!({"a": 1})))
            .await
            .unwrap();
    }
}
