//! Relay configuration.
//!
//! The configuration is read once at startup from a TOML file. Credentials
//! may be supplied through the environment instead of the file.
//!
//! ```toml
//! [icinga]
//! host = "icinga.example.com"
//! username = "relay"
//! password = "secret"
//!
//! [[subscriptions]]
//! event = "status-change"
//! queue = "icinga-relay"
//! enrich = ["service-groups"]
//!
//! [channels.ops-slack]
//! type = "webhook"
//! url = "https://hubot.example.com/hubot/slack"
//! transform = "hubot-slack"
//! append = { channels = ["#ops"] }
//!
//! [[routes]]
//! event = "status-change"
//! channel = "ops-slack"
//! filter = { "host.name" = "web1" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channels::ChannelConfig;
use crate::{Error, Result};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub icinga: IcingaConfig,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub downtime: DowntimeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Connection settings for the Icinga 2 API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcingaConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// PEM CA certificate trusted in addition to the system roots.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
    /// Delay between a failed verification and the next attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Timeout for the status probe and enrichment queries. The event stream
    /// itself has no overall timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound for one buffered event.
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
    /// Honour `HTTP(S)_PROXY` environment variables.
    #[serde(default)]
    pub use_system_proxy: bool,
}

fn default_port() -> u16 {
    5665
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_event_bytes() -> usize {
    4 * 1024 * 1024
}

impl IcingaConfig {
    /// Base URL of the API, without trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A requested slice of the event stream, published under `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Internal event name the decoded events are tagged with.
    pub event: String,
    /// Icinga event types to request.
    #[serde(default = "default_types")]
    pub types: Vec<String>,
    /// Server-side filter expression.
    #[serde(default)]
    pub filter: Option<String>,
    /// Icinga event queue name. Must be unique per subscription.
    pub queue: String,
    /// Enrichment directives applied before routing.
    #[serde(default)]
    pub enrich: Vec<String>,
}

fn default_types() -> Vec<String> {
    vec!["StateChange".to_string()]
}

/// One routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Source event type.
    pub event: String,
    /// Destination channel name.
    pub channel: String,
    /// Dotted path to expected value. Nested tables are flattened into
    /// dotted paths.
    #[serde(default)]
    pub filter: Option<Map<String, Value>>,
    #[serde(default)]
    pub append: Option<Map<String, Value>>,
    /// Outgoing event type.
    #[serde(default)]
    pub output_type: Option<String>,
}

/// Dead-man settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowntimeConfig {
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Event type of the published dead/recovered transitions.
    #[serde(default = "default_downtime_event")]
    pub event_type: String,
}

fn default_debounce_secs() -> u64 {
    10
}

/// Default event type of dead-man transitions.
pub const DEFAULT_DOWNTIME_EVENT: &str = "icinga-dead";

fn default_downtime_event() -> String {
    DEFAULT_DOWNTIME_EVENT.to_string()
}

impl Default for DowntimeConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            event_type: default_downtime_event(),
        }
    }
}

impl DowntimeConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

/// Status HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    1234
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_server_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Directory for daily rotated log files. Console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl AppConfig {
    /// Load, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Supported env vars: `ICINGA_USERNAME`, `ICINGA_PASSWORD`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("ICINGA_USERNAME")
            && !username.trim().is_empty()
        {
            self.icinga.username = username;
        }

        if let Ok(password) = std::env::var("ICINGA_PASSWORD")
            && !password.is_empty()
        {
            self.icinga.password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.icinga.host.trim().is_empty() {
            return Err(Error::config("icinga.host must not be empty"));
        }

        url::Url::parse(&self.icinga.base_url())
            .map_err(|e| Error::config(format!("Invalid Icinga URL: {}", e)))?;

        let mut queues = HashSet::new();
        for subscription in &self.subscriptions {
            if subscription.event.trim().is_empty() {
                return Err(Error::config("subscription event must not be empty"));
            }
            if subscription.queue.trim().is_empty() {
                return Err(Error::config(format!(
                    "subscription '{}' has no queue",
                    subscription.event
                )));
            }
            if subscription.types.is_empty() {
                return Err(Error::config(format!(
                    "subscription '{}' requests no event types",
                    subscription.event
                )));
            }
            if !queues.insert(subscription.queue.as_str()) {
                return Err(Error::config(format!(
                    "queue '{}' is used by more than one subscription",
                    subscription.queue
                )));
            }
        }

        Ok(())
    }
}
