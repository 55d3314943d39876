//! Event model shared by the reader, enrichment, router and channels.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A routable event: a type tag and an open payload.
///
/// Envelopes travel the bus behind an `Arc`. Anything that derives a new
/// payload clones the envelope first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Status {
    const BY_INDEX: [Status; 4] = [
        Status::Ok,
        Status::Warning,
        Status::Critical,
        Status::Unknown,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::BY_INDEX.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a non-OK state is still being rechecked (soft) or confirmed (hard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusType {
    Soft,
    Hard,
}

impl StatusType {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(StatusType::Soft),
            1 => Some(StatusType::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckState {
    pub status: Status,
    pub status_type: StatusType,
    pub attempt: u32,
}

/// A host or service reference, optionally carrying its groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl ObjectRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: None,
        }
    }
}

/// A decoded state change of a host or service check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub host: ObjectRef,
    /// Absent for host checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ObjectRef>,
    pub state: CheckState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<CheckState>,
    #[serde(default)]
    pub output: String,
}

/// Reachability of the backend as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Initialising,
    Ok,
    Critical,
}

impl HealthLevel {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthLevel::Ok)
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Initialising => write!(f, "initialising"),
            HealthLevel::Ok => write!(f, "ok"),
            HealthLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Point-in-time health report for one relay component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub name: String,
    pub module: String,
    pub status: HealthLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Component name used for all event stream health reports.
pub const EVENT_STREAM_COMPONENT: &str = "icinga-event-stream";

impl HealthStatus {
    pub fn event_stream(status: HealthLevel) -> Self {
        Self {
            name: EVENT_STREAM_COMPONENT.to_string(),
            module: EVENT_STREAM_COMPONENT.to_string(),
            status,
            url: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
