//! Local stand-in for the Icinga 2 API and a webhook receiver.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use icinga_relay::icinga::IcingaClient;

pub const USERNAME: &str = "relay";
pub const PASSWORD: &str = "secret";

/// `Basic` credentials for [`USERNAME`] and [`PASSWORD`].
pub const BASIC_AUTH: &str = "Basic cmVsYXk6c2VjcmV0";

/// One request as seen by the fixture.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub authorization: Option<String>,
}

impl Recorded {
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }
}

/// How `/v1/events` answers.
#[derive(Debug, Clone)]
pub struct EventsReply {
    pub status: StatusCode,
    pub chunks: Vec<String>,
    /// Keep the response open after the last chunk.
    pub hold_open: bool,
}

impl Default for EventsReply {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            chunks: Vec::new(),
            hold_open: true,
        }
    }
}

struct MockState {
    status: Mutex<(StatusCode, String)>,
    events: Mutex<EventsReply>,
    services: Mutex<(StatusCode, Value)>,
    event_connections: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
    deliveries: Mutex<Vec<(HeaderMap, Value)>>,
}

#[derive(Clone)]
pub struct MockIcinga {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockIcinga {
    /// Serve on an ephemeral local port until the test runtime ends.
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            status: Mutex::new((StatusCode::OK, healthy_status_body().to_string())),
            events: Mutex::new(EventsReply::default()),
            services: Mutex::new((StatusCode::OK, json!({"results": []}))),
            event_connections: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mock = Self { addr, state };
        let app = Router::new()
            .route("/v1/status", get(status))
            .route("/v1/events", post(events))
            .route("/v1/objects/services", get(services))
            .route("/hook", post(hook))
            .with_state(mock.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        mock
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hook_url(&self) -> String {
        format!("{}/hook", self.base_url())
    }

    pub fn client(&self) -> IcingaClient {
        IcingaClient::new(self.base_url(), USERNAME, PASSWORD, None, false).unwrap()
    }

    pub fn set_status(&self, status: StatusCode, body: impl Into<String>) {
        *self.state.status.lock() = (status, body.into());
    }

    pub fn set_events(&self, reply: EventsReply) {
        *self.state.events.lock() = reply;
    }

    pub fn set_services(&self, status: StatusCode, body: Value) {
        *self.state.services.lock() = (status, body);
    }

    pub fn event_connections(&self) -> usize {
        self.state.event_connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.uri.path() == path)
            .cloned()
            .collect()
    }

    pub fn deliveries(&self) -> Vec<(HeaderMap, Value)> {
        self.state.deliveries.lock().clone()
    }

    fn record(&self, method: Method, uri: Uri, headers: &HeaderMap) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.state.requests.lock().push(Recorded {
            method,
            uri,
            authorization,
        });
    }
}

async fn status(
    State(mock): State<MockIcinga>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(method, uri, &headers);
    let (status, body) = mock.state.status.lock().clone();
    (status, body).into_response()
}

async fn events(
    State(mock): State<MockIcinga>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(method, uri, &headers);
    mock.state.event_connections.fetch_add(1, Ordering::SeqCst);

    let reply = mock.state.events.lock().clone();
    if !reply.status.is_success() {
        return reply.status.into_response();
    }

    let chunks = futures::stream::iter(
        reply
            .chunks
            .into_iter()
            .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))),
    );
    let body = if reply.hold_open {
        Body::from_stream(chunks.chain(futures::stream::pending()))
    } else {
        Body::from_stream(chunks)
    };
    (StatusCode::OK, body).into_response()
}

async fn services(
    State(mock): State<MockIcinga>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(method, uri, &headers);
    let (status, body) = mock.state.services.lock().clone();
    (status, body.to_string()).into_response()
}

async fn hook(State(mock): State<MockIcinga>, headers: HeaderMap, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<Value>(&body) {
        Ok(body) => {
            mock.state.deliveries.lock().push((headers, body));
            StatusCode::OK
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

/// `/v1/status` body of a healthy instance with a connected IDO database.
pub fn healthy_status_body() -> Value {
    ido_status_body(true)
}

pub fn ido_status_body(connected: bool) -> Value {
    json!({
        "results": [
            {
                "name": "IdoMysqlConnection",
                "perfdata": [],
                "status": {
                    "idomysqlconnection": {
                        "ido-mysql": {
                            "connected": connected,
                            "instance_name": "default",
                            "version": "1.14.3"
                        }
                    }
                }
            }
        ]
    })
}

/// A raw `StateChange` event as written on the stream.
pub fn state_change(host: &str, service: &str, state: f64, state_type: f64) -> Value {
    json!({
        "type": "StateChange",
        "host": host,
        "service": service,
        "state": state,
        "state_type": state_type,
        "timestamp": 1_700_000_000.5,
        "check_result": {
            "output": "HTTP CRITICAL - connection refused",
            "vars_after": {"attempt": 1.0, "reachable": true, "state": state, "state_type": state_type},
            "vars_before": {"attempt": 1.0, "reachable": true, "state": 0.0, "state_type": 1.0}
        }
    })
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
