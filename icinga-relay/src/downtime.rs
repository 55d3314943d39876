//! Dead-man monitor for the backend connection.
//!
//! Watches health updates and publishes a `dead` event once the connection
//! has stayed unhealthy for the debounce period, and a `recovered` event as
//! soon as it is healthy again.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, EventBus};
use crate::config::DowntimeConfig;
use crate::model::{Envelope, HealthLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DowntimeTransition {
    Dead,
    Recovered,
}

impl DowntimeTransition {
    pub fn into_envelope(self, event_type: &str, status: HealthLevel) -> Envelope {
        Envelope::new(
            event_type,
            json!({
                "status": status,
                "transition": self,
            }),
        )
    }
}

/// What the monitor has to do after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerAction {
    None,
    /// Healthy to unhealthy: start the debounce timer.
    ArmTimer,
    /// Unhealthy to healthy: cancel any timer and report recovery.
    Recovered,
}

/// Baseline bookkeeping, without timers.
#[derive(Debug, Default)]
pub struct DowntimeTracker {
    baseline: Option<HealthLevel>,
    /// Status that armed the pending timer.
    trigger: Option<HealthLevel>,
}

impl DowntimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> Option<HealthLevel> {
        self.baseline
    }

    pub fn trigger(&self) -> Option<HealthLevel> {
        self.trigger
    }

    pub fn observe(&mut self, level: HealthLevel) -> TrackerAction {
        let previous = self.baseline.replace(level);

        let action = match previous {
            None => TrackerAction::None,
            Some(previous) if previous == level => TrackerAction::None,
            Some(previous) if previous.is_ok() => TrackerAction::ArmTimer,
            Some(_) if level.is_ok() => TrackerAction::Recovered,
            Some(_) => TrackerAction::None,
        };

        match action {
            TrackerAction::ArmTimer => self.trigger = Some(level),
            TrackerAction::Recovered => self.trigger = None,
            TrackerAction::None => {}
        }
        action
    }

    /// The status the expired timer was armed with.
    pub fn take_trigger(&mut self) -> Option<HealthLevel> {
        self.trigger.take()
    }
}

pub struct DowntimeMonitor {
    bus: EventBus,
    debounce: Duration,
    event_type: String,
}

async fn debounce_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl DowntimeMonitor {
    pub fn new(bus: EventBus, config: &DowntimeConfig) -> Self {
        Self {
            bus,
            debounce: config.debounce(),
            event_type: config.event_type.clone(),
        }
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
        let mut tracker = DowntimeTracker::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let pending = deadline;

            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => break,

                _ = debounce_timer(pending) => {
                    deadline = None;
                    let status = tracker.take_trigger().unwrap_or(HealthLevel::Critical);
                    warn!(status = %status, "Icinga connection lost");
                    self.emit(DowntimeTransition::Dead, status);
                }

                message = receiver.recv() => match message {
                    Ok(BusMessage::UpdateStatus(update)) => match tracker.observe(update.status) {
                        TrackerAction::None => {}
                        TrackerAction::ArmTimer => {
                            debug!(status = %update.status, debounce = ?self.debounce, "Connection unhealthy, waiting");
                            deadline = Some(Instant::now() + self.debounce);
                        }
                        TrackerAction::Recovered => {
                            deadline = None;
                            info!("Icinga connection restored");
                            self.emit(DowntimeTransition::Recovered, update.status);
                        }
                    },
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Downtime monitor lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("Downtime monitor stopped");
    }

    fn emit(&self, transition: DowntimeTransition, status: HealthLevel) {
        let envelope = transition.into_envelope(&self.event_type, status);
        self.bus.publish(BusMessage::Event(Arc::new(envelope)));
    }
}
