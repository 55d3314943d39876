//! Generic webhook output channel.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{OutputChannel, Transform, TransformContext};
use crate::config::DEFAULT_DOWNTIME_EVENT;
use crate::model::Envelope;
use crate::{Error, Result};

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub transform: Transform,
    /// Slack workspace name passed to the `hubot-slack` transform.
    #[serde(default)]
    pub slack_project: Option<String>,
    /// Fields merged into every event routed to this channel.
    #[serde(default)]
    pub append: Map<String, Value>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            auth: None,
            timeout_secs: 30,
            transform: Transform::None,
            slack_project: None,
            append: Map::new(),
        }
    }
}

/// Generic webhook output channel.
pub struct WebhookChannel {
    name: String,
    config: WebhookConfig,
    client: Client,
    downtime_event: String,
}

impl WebhookChannel {
    /// Create a new webhook channel.
    pub fn new(name: impl Into<String>, config: WebhookConfig) -> Result<Self> {
        let name = name.into();
        if config.url.trim().is_empty() {
            return Err(Error::config(format!("channel '{}' has no url", name)));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name,
            config,
            client,
            downtime_event: DEFAULT_DOWNTIME_EVENT.to_string(),
        })
    }

    /// Event type of downtime transitions, for the transforms.
    pub fn with_downtime_event(mut self, event_type: impl Into<String>) -> Self {
        self.downtime_event = event_type.into();
        self
    }

    /// Build the request headers.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, value);
            }
        }

        if let Some(auth) = &self.config.auth {
            match auth {
                WebhookAuth::Bearer { token } => {
                    if let Ok(value) = format!("Bearer {}", token).parse() {
                        headers.insert(reqwest::header::AUTHORIZATION, value);
                    }
                }
                WebhookAuth::Header { name, value } => {
                    if let (Ok(name), Ok(value)) = (
                        name.parse::<reqwest::header::HeaderName>(),
                        value.parse::<reqwest::header::HeaderValue>(),
                    ) {
                        headers.insert(name, value);
                    }
                }
                // Set on the request builder.
                WebhookAuth::Basic { .. } => {}
            }
        }

        headers
    }

    /// The transformed envelope, as sent.
    fn build_payload(&self, event: &Envelope) -> Envelope {
        self.config.transform.apply(
            event,
            TransformContext {
                slack_project: self.config.slack_project.as_deref(),
                downtime_event: &self.downtime_event,
            },
        )
    }
}

#[async_trait]
impl OutputChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &Envelope) -> Result<()> {
        let payload = self.build_payload(event);
        let headers = self.build_headers();

        let mut request = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&self.config.url),
            _ => self.client.post(&self.config.url),
        };

        request = request.headers(headers).json(&payload);

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Other(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(channel = %self.name, status = %status, body = %body, "Webhook failed");
            return Err(Error::Other(format!("Webhook failed: {} - {}", status, body)));
        }

        debug!(channel = %self.name, event_type = %payload.event_type, "Webhook delivered");
        Ok(())
    }
}
