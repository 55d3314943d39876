//! Backend health probe.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::IcingaClient;
use crate::{Error, Result};

/// One health check of the backend. Implementations perform a single attempt
/// and never retry.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Probes `GET /v1/status` and validates the reported backend state.
#[derive(Debug, Clone)]
pub struct StatusVerifier {
    client: IcingaClient,
    timeout: Duration,
}

impl StatusVerifier {
    pub fn new(client: IcingaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HealthProbe for StatusVerifier {
    async fn probe(&self) -> Result<()> {
        debug!(url = %self.client.url("/v1/status"), "Checking Icinga status");

        let response = self
            .client
            .get("/v1/status")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Error::unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status));
        }

        let body = response.bytes().await.map_err(Error::unreachable)?;
        check_status_body(&body)?;

        info!("Icinga status check complete");
        Ok(())
    }
}

/// Validate a `/v1/status` response body.
///
/// Fails on an empty or unparsable body, and when the IDO MySQL connection
/// reports itself disconnected. Anything else counts as healthy, including a
/// response without an `IdoMysqlConnection` entry.
pub fn check_status_body(body: &[u8]) -> Result<()> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::invalid_response("empty status response"));
    }

    let response: Value = serde_json::from_slice(body)
        .map_err(|e| Error::invalid_response(format!("status response is not JSON: {}", e)))?;

    let ido_connected = response
        .get("results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|result| result.get("name").and_then(Value::as_str) == Some("IdoMysqlConnection"))
        .find_map(|result| {
            result
                .pointer("/status/idomysqlconnection/ido-mysql/connected")
                .and_then(Value::as_bool)
        });

    if ido_connected == Some(false) {
        return Err(Error::DegradedBackend(
            "Icinga 2 IDO MySQL disconnected".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_body(connected: bool) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "results": [
                {"name": "ApiListener", "status": {"api": {"num_endpoints": 1}}},
                {
                    "name": "IdoMysqlConnection",
                    "perfdata": [],
                    "status": {"idomysqlconnection": {"ido-mysql": {
                        "connected": connected,
                        "instance_name": "default"
                    }}}
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_healthy_backend() {
        assert!(check_status_body(&status_body(true)).is_ok());
    }

    #[test]
    fn test_database_disconnected() {
        let err = check_status_body(&status_body(false)).unwrap_err();
        assert!(matches!(err, Error::DegradedBackend(_)));
    }

    #[test]
    fn test_no_ido_section_is_healthy() {
        assert!(check_status_body(br#"{"results":[]}"#).is_ok());
        assert!(check_status_body(br#"{"results":[{"name":"IdoMysqlConnection"}]}"#).is_ok());
        assert!(check_status_body(br#"{}"#).is_ok());
    }

    #[test]
    fn test_empty_body() {
        assert!(matches!(
            check_status_body(b""),
            Err(Error::InvalidResponse(_))
        ));
        assert!(matches!(
            check_status_body(b" \r\n"),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            check_status_body(b"<html>502</html>"),
            Err(Error::InvalidResponse(_))
        ));
    }
}
