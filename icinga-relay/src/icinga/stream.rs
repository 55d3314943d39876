//! Long-lived `/v1/events` subscription.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::BytesMut;
use futures::StreamExt;
use json_stream::JsonStreamCodec;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{IcingaClient, StreamLossNotifier, status_change_from_icinga};
use crate::bus::{BusMessage, EventBus};
use crate::config::Subscription;
use crate::model::{Envelope, HealthLevel, HealthStatus};
use crate::{Error, Result};

/// Something the supervisor can ask to (re)open its stream.
pub trait StreamConnector: Send + Sync {
    /// Open the stream unless a connection is already pending or open.
    ///
    /// `lost` is notified once when the opened stream ends.
    fn connect(&self, lost: StreamLossNotifier);

    /// Queue name, used to attribute stream-loss signals.
    fn queue(&self) -> &str;
}

const IDLE: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;

/// Reader for one subscription.
///
/// Each successful [`connect`](StreamConnector::connect) spawns one task that
/// owns the HTTP response until the stream ends. The reader never reconnects
/// on its own; it notifies the supervisor, publishes
/// [`BusMessage::StreamLost`] for observers, and waits to be told.
#[derive(Clone)]
pub struct EventStreamReader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    client: IcingaClient,
    subscription: Subscription,
    bus: EventBus,
    max_event_bytes: usize,
    state: AtomicU8,
    cancellation_token: CancellationToken,
}

impl EventStreamReader {
    pub fn new(
        client: IcingaClient,
        subscription: Subscription,
        bus: EventBus,
        max_event_bytes: usize,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                client,
                subscription,
                bus,
                max_event_bytes,
                state: AtomicU8::new(IDLE),
                cancellation_token,
            }),
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CONNECTING
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CONNECTED
    }
}

impl StreamConnector for EventStreamReader {
    fn connect(&self, lost: StreamLossNotifier) {
        if self
            .inner
            .state
            .compare_exchange(IDLE, CONNECTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                queue = %self.inner.subscription.queue,
                "Event stream already open, ignoring connect"
            );
            return;
        }

        info!(
            queue = %self.inner.subscription.queue,
            url = %self.inner.client.url("/v1/events"),
            "Connecting to Icinga event stream"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(lost).await });
    }

    fn queue(&self) -> &str {
        &self.inner.subscription.queue
    }
}

/// Query parameters of the events request.
pub(crate) fn event_query(subscription: &Subscription) -> Vec<(&'static str, &str)> {
    let mut query: Vec<(&'static str, &str)> = subscription
        .types
        .iter()
        .map(|event_type| ("types", event_type.as_str()))
        .collect();
    if let Some(filter) = &subscription.filter {
        query.push(("filter", filter.as_str()));
    }
    query.push(("queue", subscription.queue.as_str()));
    query
}

impl ReaderInner {
    async fn run(&self, lost: StreamLossNotifier) {
        let queue = self.subscription.queue.clone();

        let result = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => {
                self.state.store(IDLE, Ordering::Release);
                debug!(queue = %queue, "Event stream cancelled");
                return;
            }
            result = self.stream() => result,
        };

        self.state.store(IDLE, Ordering::Release);

        match result {
            Ok(()) => info!(queue = %queue, "Event stream closed"),
            Err(e) if e.is_auth() => {
                error!(queue = %queue, error = %e, "Icinga rejected the event stream credentials")
            }
            Err(e) => error!(queue = %queue, error = %e, "Event stream failed"),
        }

        self.bus.publish(BusMessage::StreamLost {
            queue: queue.clone(),
        });
        lost.notify(queue);
    }

    async fn stream(&self) -> Result<()> {
        let response = self
            .client
            .post("/v1/events")
            .query(&event_query(&self.subscription))
            .send()
            .await
            .map_err(Error::unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status));
        }

        self.state.store(CONNECTED, Ordering::Release);
        info!(queue = %self.subscription.queue, "Connected to Icinga event stream");
        self.bus.publish(BusMessage::UpdateStatus(
            HealthStatus::event_stream(HealthLevel::Ok).with_url(self.client.base_url()),
        ));

        let mut codec = JsonStreamCodec::with_max_value_len(self.max_event_bytes);
        let mut buffer = BytesMut::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Error::unreachable)?;
            trace!(queue = %self.subscription.queue, len = chunk.len(), "Event stream data");
            buffer.extend_from_slice(&chunk);
            self.drain(&mut codec, &mut buffer)?;
        }

        match codec.decode_eof(&mut buffer) {
            Ok(Some(value)) => self.dispatch(value),
            Ok(None) => {}
            Err(e) => warn!(queue = %self.subscription.queue, error = %e, "Discarding trailing event data"),
        }

        Ok(())
    }

    /// Decode and publish every complete value in `buffer`.
    fn drain(&self, codec: &mut JsonStreamCodec, buffer: &mut BytesMut) -> Result<()> {
        loop {
            match codec.decode(buffer) {
                Ok(Some(value)) => self.dispatch(value),
                Ok(None) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    warn!(queue = %self.subscription.queue, error = %e, "Skipping malformed event")
                }
                Err(e) => return Err(Error::invalid_response(e.to_string())),
            }
        }
    }

    fn dispatch(&self, value: Value) {
        let change = match status_change_from_icinga(value) {
            Ok(change) => change,
            Err(e) => {
                warn!(queue = %self.subscription.queue, error = %e, "Skipping unmappable event");
                return;
            }
        };

        let data = match serde_json::to_value(&change) {
            Ok(data) => data,
            Err(e) => {
                warn!(queue = %self.subscription.queue, error = %e, "Failed to serialize event");
                return;
            }
        };

        debug!(
            queue = %self.subscription.queue,
            host = %change.host.name,
            status = %change.state.status,
            "Event received"
        );
        self.bus.publish(BusMessage::Received(Arc::new(Envelope::new(
            self.subscription.event.clone(),
            data,
        ))));
    }
}
