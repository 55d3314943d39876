//! Latest health report per component, fed from the bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, EventBus};
use crate::model::HealthStatus;

#[derive(Clone, Default)]
pub struct StatusRegistry {
    statuses: Arc<RwLock<BTreeMap<String, HealthStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, status: HealthStatus) {
        info!(component = %status.name, status = %status.status, "Component registered");
        self.statuses.write().insert(status.name.clone(), status);
    }

    /// Apply an update. The previous URL is kept when the update has none;
    /// an unknown component is registered implicitly.
    pub fn update(&self, update: HealthStatus) {
        let mut statuses = self.statuses.write();
        match statuses.get_mut(&update.name) {
            Some(current) => {
                if current.status != update.status {
                    info!(
                        component = %update.name,
                        from = %current.status,
                        to = %update.status,
                        "Component status changed"
                    );
                }
                current.status = update.status;
                current.message = update.message;
                current.timestamp = update.timestamp;
                if update.url.is_some() {
                    current.url = update.url;
                }
            }
            None => {
                statuses.insert(update.name.clone(), update);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<HealthStatus> {
        self.statuses.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<HealthStatus> {
        self.statuses.read().values().cloned().collect()
    }

    pub fn spawn(&self, bus: &EventBus, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let receiver = bus.subscribe();
        tokio::spawn(self.clone().run(receiver, cancellation_token))
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
                    Ok(BusMessage::RegisterStatus(status)) => self.register(status),
                    Ok(BusMessage::UpdateStatus(status)) => self.update(status),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Status registry lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("Status registry stopped");
    }
}
