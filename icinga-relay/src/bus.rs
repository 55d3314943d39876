//! In-process publish/subscribe bus.
//!
//! All relay components communicate through one [`EventBus`] created at
//! startup and handed to each component that needs it. Publishing never
//! waits: a subscriber that falls behind loses the oldest messages instead of
//! slowing down the producers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::model::{Envelope, HealthStatus};

/// Messages carried by the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// A component announces itself with its initial health.
    RegisterStatus(HealthStatus),
    /// A component's health changed (or was re-checked).
    UpdateStatus(HealthStatus),
    /// An event stream connection ended.
    StreamLost { queue: String },
    /// A decoded event, before enrichment.
    Received(Arc<Envelope>),
    /// An event ready for routing.
    Event(Arc<Envelope>),
    /// A routed event for a named output channel.
    Publish {
        channel: String,
        event: Arc<Envelope>,
    },
}

impl BusMessage {
    /// Short topic name for logging.
    pub fn topic(&self) -> &'static str {
        match self {
            BusMessage::RegisterStatus(_) => "register-status",
            BusMessage::UpdateStatus(_) => "update-status",
            BusMessage::StreamLost { .. } => "stream-lost",
            BusMessage::Received(_) => "received",
            BusMessage::Event(_) => "event",
            BusMessage::Publish { .. } => "publish",
        }
    }
}

/// Default channel capacity for the bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcaster shared by all relay components.
pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
}

impl EventBus {
    /// Create a new bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to bus messages.
    ///
    /// Only messages published after this call are received, so components
    /// subscribe before any producer is started.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Publish a message.
    ///
    /// Returns the number of receivers that received the message, 0 if there
    /// are no active subscribers.
    pub fn publish(&self, message: BusMessage) -> usize {
        tracing::trace!(topic = message.topic(), "Publishing bus message");
        self.sender.send(message).unwrap_or(0)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
