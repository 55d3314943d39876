use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::{OutputChannel, Transform, TransformContext};
use crate::Result;
use crate::config::DEFAULT_DOWNTIME_EVENT;
use crate::model::Envelope;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub slack_project: Option<String>,
    #[serde(default)]
    pub append: Map<String, Value>,
}

/// Writes routed events to the relay log.
pub struct LogChannel {
    name: String,
    config: LogConfig,
    downtime_event: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>, config: LogConfig) -> Self {
        Self {
            name: name.into(),
            config,
            downtime_event: DEFAULT_DOWNTIME_EVENT.to_string(),
        }
    }

    pub fn with_downtime_event(mut self, event_type: impl Into<String>) -> Self {
        self.downtime_event = event_type.into();
        self
    }
}

#[async_trait]
impl OutputChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "log"
    }

    async fn send(&self, event: &Envelope) -> Result<()> {
        let payload = self.config.transform.apply(
            event,
            TransformContext {
                slack_project: self.config.slack_project.as_deref(),
                downtime_event: &self.downtime_event,
            },
        );
        let data = serde_json::to_string(&payload.data)?;

        info!(
            channel = %self.name,
            event_type = %payload.event_type,
            data = %data,
            "Event published"
        );
        Ok(())
    }
}
