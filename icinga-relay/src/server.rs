//! HTTP status endpoint.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::model::HealthStatus;
use crate::status::StatusRegistry;
use crate::{Error, Result};

#[derive(Clone)]
struct ServerState {
    registry: StatusRegistry,
    start_time: Instant,
}

pub struct StatusServer {
    config: ServerConfig,
    state: ServerState,
}

impl StatusServer {
    pub fn new(config: ServerConfig, registry: StatusRegistry) -> Self {
        Self {
            config,
            state: ServerState {
                registry,
                start_time: Instant::now(),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/status", get(status))
            .route("/status/live", get(liveness_check))
            .with_state(self.state.clone())
    }

    /// Serve until `cancellation_token` is cancelled.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid server address: {}", e)))?;

        let router = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("Status server listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancellation_token.cancelled().await;
                info!("Status server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// All registered component statuses.
async fn status(State(state): State<ServerState>) -> Json<Vec<HealthStatus>> {
    Json(state.registry.snapshot())
}

/// Liveness check - is the relay responsive?
async fn liveness_check(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
