//! Connection supervisor.
//!
//! Owns the lifecycle of the backend connection: verify the backend, open
//! every event stream once it is healthy, and start over after a fixed delay
//! whenever verification fails or a stream is lost.
//!
//! ```text
//! Disconnected --Connect--------> Verifying
//! Verifying    --ProbeSucceeded-> Verified        (readers connect)
//! Verifying    --ProbeFailed----> WaitingToRetry  (critical status, timer armed)
//! WaitingToRetry --RetryElapsed-> Verifying       (probe runs)
//! Verified     --StreamLost-----> WaitingToRetry
//! ```
//!
//! Every input is handled by one actor loop fed by an unbounded inbox. The
//! probe runs in its own task and posts its outcome back as an input tagged
//! with the attempt number, so an outcome that arrives after the state moved
//! on is discarded. Readers report a lost stream through a
//! [`StreamLossNotifier`] on the same inbox; the bus copy of that signal is
//! for observers only and may be dropped when a subscriber lags.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HealthProbe, StreamConnector};
use crate::bus::{BusMessage, EventBus};
use crate::model::{HealthLevel, HealthStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Verifying,
    WaitingToRetry,
    Verified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorInput {
    Connect,
    ProbeSucceeded { attempt: u64 },
    ProbeFailed { attempt: u64, error: String },
    RetryElapsed,
    StreamLost { queue: String },
}

/// The transition table. `None` means the input is ignored in `state`.
pub fn transition(state: ConnectionState, input: &SupervisorInput) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (state, input) {
        (Disconnected, SupervisorInput::Connect) => Some(Verifying),
        (Verifying, SupervisorInput::ProbeSucceeded { .. }) => Some(Verified),
        (Verifying, SupervisorInput::ProbeFailed { .. }) => Some(WaitingToRetry),
        (WaitingToRetry, SupervisorInput::RetryElapsed) => Some(Verifying),
        (Verified, SupervisorInput::StreamLost { .. }) => Some(WaitingToRetry),
        _ => None,
    }
}

/// Lets a reader report that its stream ended.
#[derive(Debug, Clone)]
pub struct StreamLossNotifier {
    inbox: mpsc::UnboundedSender<SupervisorInput>,
}

impl StreamLossNotifier {
    pub fn new(inbox: mpsc::UnboundedSender<SupervisorInput>) -> Self {
        Self { inbox }
    }

    pub fn notify(&self, queue: impl Into<String>) {
        let queue = queue.into();
        if self
            .inbox
            .send(SupervisorInput::StreamLost {
                queue: queue.clone(),
            })
            .is_err()
        {
            debug!(queue = %queue, "Connection supervisor has stopped, dropping stream loss");
        }
    }
}

pub struct ConnectionSupervisor {
    probe: Arc<dyn HealthProbe>,
    readers: Vec<Arc<dyn StreamConnector>>,
    bus: EventBus,
    retry_delay: Duration,
    backend_url: String,
}

impl ConnectionSupervisor {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        readers: Vec<Arc<dyn StreamConnector>>,
        bus: EventBus,
        retry_delay: Duration,
        backend_url: impl Into<String>,
    ) -> Self {
        Self {
            probe,
            readers,
            bus,
            retry_delay,
            backend_url: backend_url.into(),
        }
    }

    /// Start the actor and announce the event stream component.
    ///
    /// The supervisor stays `Disconnected` until [`SupervisorHandle::connect`].
    pub fn spawn(self, cancellation_token: CancellationToken) -> SupervisorHandle {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        self.bus.publish(BusMessage::RegisterStatus(
            HealthStatus::event_stream(HealthLevel::Initialising).with_url(&self.backend_url),
        ));

        let actor = SupervisorActor {
            probe: self.probe,
            readers: self.readers,
            bus: self.bus,
            retry_delay: self.retry_delay,
            backend_url: self.backend_url,
            inbox_tx: inbox_tx.clone(),
            inbox,
            state: ConnectionState::Disconnected,
            state_tx,
            attempt: 0,
            retry_at: None,
            cancellation_token,
        };
        tokio::spawn(actor.run());

        SupervisorHandle {
            inbox: inbox_tx,
            state: state_rx,
        }
    }
}

/// Handle on a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    inbox: mpsc::UnboundedSender<SupervisorInput>,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    /// Start the first verification.
    pub fn connect(&self) {
        if self.inbox.send(SupervisorInput::Connect).is_err() {
            warn!("Connection supervisor has stopped, ignoring connect");
        }
    }

    /// Notifier that feeds stream loss into this supervisor.
    pub fn loss_notifier(&self) -> StreamLossNotifier {
        StreamLossNotifier::new(self.inbox.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

struct SupervisorActor {
    probe: Arc<dyn HealthProbe>,
    readers: Vec<Arc<dyn StreamConnector>>,
    bus: EventBus,
    retry_delay: Duration,
    backend_url: String,
    inbox_tx: mpsc::UnboundedSender<SupervisorInput>,
    inbox: mpsc::UnboundedReceiver<SupervisorInput>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// Number of the most recently started probe.
    attempt: u64,
    retry_at: Option<Instant>,
    cancellation_token: CancellationToken,
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SupervisorActor {
    async fn run(mut self) {
        debug!("Connection supervisor started");

        loop {
            let retry_at = self.retry_at;

            let input = tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => break,

                Some(input) = self.inbox.recv() => input,

                _ = retry_timer(retry_at) => {
                    self.retry_at = None;
                    SupervisorInput::RetryElapsed
                }
            };

            self.handle(input);
        }

        debug!("Connection supervisor stopped");
    }

    fn handle(&mut self, input: SupervisorInput) {
        if let SupervisorInput::ProbeSucceeded { attempt }
        | SupervisorInput::ProbeFailed { attempt, .. } = &input
            && *attempt != self.attempt
        {
            debug!(attempt, current = self.attempt, "Discarding stale probe result");
            return;
        }

        let Some(next) = transition(self.state, &input) else {
            debug!(state = ?self.state, input = ?input, "Ignoring supervisor input");
            return;
        };

        match &input {
            SupervisorInput::ProbeFailed { error, .. } => {
                warn!(url = %self.backend_url, error = %error, "Icinga verification failed");
                self.bus.publish(BusMessage::UpdateStatus(
                    HealthStatus::event_stream(HealthLevel::Critical)
                        .with_url(&self.backend_url)
                        .with_message(error.as_str()),
                ));
            }
            SupervisorInput::StreamLost { queue } => {
                warn!(queue = %queue, "Icinga event stream lost");
            }
            _ => {}
        }

        self.enter(next);
    }

    fn enter(&mut self, state: ConnectionState) {
        debug!(from = ?self.state, to = ?state, "Connection state changed");
        self.state = state;
        self.state_tx.send_replace(state);

        match state {
            ConnectionState::Disconnected => {}
            ConnectionState::Verifying => self.start_probe(),
            ConnectionState::WaitingToRetry => {
                if self.retry_at.is_none() {
                    info!(delay = ?self.retry_delay, "Retrying connection");
                    self.retry_at = Some(Instant::now() + self.retry_delay);
                }
            }
            ConnectionState::Verified => {
                info!(url = %self.backend_url, readers = self.readers.len(), "Icinga verified, opening event streams");
                for reader in &self.readers {
                    reader.connect(StreamLossNotifier::new(self.inbox_tx.clone()));
                }
            }
        }
    }

    fn start_probe(&mut self) {
        self.attempt += 1;
        let attempt = self.attempt;
        let probe = self.probe.clone();
        let inbox = self.inbox_tx.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => return,
                result = probe.probe() => result,
            };

            let input = match result {
                Ok(()) => SupervisorInput::ProbeSucceeded { attempt },
                Err(e) => {
                    if e.is_auth() {
                        error!(error = %e, "Icinga rejected the configured credentials");
                    }
                    SupervisorInput::ProbeFailed {
                        attempt,
                        error: e.to_string(),
                    }
                }
            };
            let _ = inbox.send(input);
        });
    }
}
