//! Adds host and service group membership from the object API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use super::Enricher;
use crate::icinga::IcingaClient;
use crate::model::Envelope;
use crate::{Error, Result};

const SERVICES_PATH: &str = "/v1/objects/services";

pub struct ServiceGroupsEnricher {
    client: IcingaClient,
    timeout: Duration,
}

impl ServiceGroupsEnricher {
    pub const NAME: &'static str = "service-groups";

    pub fn new(client: IcingaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// First matching service object, if any.
    async fn lookup(&self, host: &str, service: &str) -> Result<Option<Value>> {
        let filter = filter_expression(host, service);
        let response = self
            .client
            .get(SERVICES_PATH)
            .query(&[("joins", "host"), ("filter", filter.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Error::unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status));
        }

        let body = response.bytes().await.map_err(Error::unreachable)?;
        let parsed: Value = serde_json::from_slice(&body)
            .map_err(|e| Error::invalid_response(format!("object query is not JSON: {}", e)))?;

        Ok(parsed
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .cloned())
    }
}

/// `host.name=="H"&&service.name=="S"` with both names quoted as Icinga DSL
/// strings.
pub(crate) fn filter_expression(host: &str, service: &str) -> String {
    format!(
        "host.name=={}&&service.name=={}",
        dsl_string(host),
        dsl_string(service)
    )
}

fn dsl_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Copy `event` with `host.groups` and `service.groups` taken from a service
/// object query result. Groups missing from the result are left untouched.
pub(crate) fn apply_groups(event: &Envelope, result: &Value) -> Envelope {
    let mut enriched = event.clone();

    if let Some(groups) = result.pointer("/joins/host/groups")
        && let Some(host) = enriched.data.get_mut("host").and_then(Value::as_object_mut)
    {
        host.insert("groups".to_string(), groups.clone());
    }

    if let Some(groups) = result.pointer("/attrs/groups")
        && let Some(service) = enriched
            .data
            .get_mut("service")
            .and_then(Value::as_object_mut)
    {
        service.insert("groups".to_string(), groups.clone());
    }

    enriched
}

#[async_trait]
impl Enricher for ServiceGroupsEnricher {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn enrich(&self, event: Arc<Envelope>) -> Arc<Envelope> {
        let host = event.data.pointer("/host/name").and_then(Value::as_str);
        let service = event.data.pointer("/service/name").and_then(Value::as_str);

        let (Some(host), Some(service)) = (host, service) else {
            info!(
                host = host.unwrap_or_default(),
                service = service.unwrap_or_default(),
                "Missing service or host, not enriching"
            );
            return event;
        };

        debug!(host, service, "Getting service details");

        match self.lookup(host, service).await {
            Ok(Some(result)) => Arc::new(apply_groups(&event, &result)),
            Ok(None) => {
                info!(host, service, "Icinga API returned no results");
                event
            }
            Err(e) => {
                error!(host, service, error = %e, "Service details lookup failed");
                event
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_change() -> Envelope {
        Envelope::new(
            "status-change",
            json!({
                "host": {"name": "web1"},
                "service": {"name": "http"},
                "state": {"status": "CRITICAL", "statusType": "HARD", "attempt": 1},
                "output": "down"
            }),
        )
    }

    fn enricher() -> ServiceGroupsEnricher {
        let client = IcingaClient::new("http://127.0.0.1:9", "u", "p", None, false).unwrap();
        ServiceGroupsEnricher::new(client, Duration::from_secs(1))
    }

    #[test]
    fn test_apply_groups() {
        let event = status_change();
        let result = json!({
            "name": "web1!http",
            "attrs": {"groups": ["http-checks"]},
            "joins": {"host": {"groups": ["linux", "web"]}}
        });

        let enriched = apply_groups(&event, &result);

        assert_eq!(enriched.data["host"]["groups"], json!(["linux", "web"]));
        assert_eq!(enriched.data["service"]["groups"], json!(["http-checks"]));
        assert_eq!(enriched.data["state"], event.data["state"]);
        assert_eq!(enriched.data["output"], "down");
        assert!(event.data["host"].get("groups").is_none());
    }

    #[test]
    fn test_apply_groups_partial_result() {
        let enriched = apply_groups(&status_change(), &json!({"attrs": {"groups": []}}));

        assert!(enriched.data["host"].get("groups").is_none());
        assert_eq!(enriched.data["service"]["groups"], json!([]));
    }

    #[test]
    fn test_filter_expression() {
        assert_eq!(
            filter_expression("web1", "http"),
            r#"host.name=="web1"&&service.name=="http""#
        );
        assert_eq!(
            filter_expression(r#"we"b"#, r"a\b"),
            r#"host.name=="we\"b"&&service.name=="a\\b""#
        );
    }

    #[tokio::test]
    async fn test_host_event_is_returned_unchanged() {
        let mut event = status_change();
        event.data.as_object_mut().unwrap().remove("service");
        let event = Arc::new(event);

        let result = enricher().enrich(event.clone()).await;
        assert!(Arc::ptr_eq(&result, &event));
    }
}
