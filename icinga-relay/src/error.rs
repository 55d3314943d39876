//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Connect, send or read failure talking to the backend.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The backend rejected the configured credentials.
    #[error("Backend rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The backend answered but reports one of its own dependencies as down.
    #[error("Backend degraded: {0}")]
    DegradedBackend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn unreachable(err: impl std::fmt::Display) -> Self {
        Self::Unreachable(err.to_string())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Map a non-success HTTP status to the matching error kind.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::Unauthorized {
                    status: status.as_u16(),
                }
            }
            _ => Self::Unreachable(format!("HTTP {}", status)),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
