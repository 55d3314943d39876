//! Logging setup.
//!
//! Console output always, plus a daily rotated log file when a log directory
//! is configured. Timestamps use the local timezone.

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "icinga_relay=info,json_stream=info";

/// Log file name prefix inside the log directory.
const LOG_FILE_NAME: &str = "icinga-relay.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// `RUST_LOG` wins over the configured directive.
fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = settings.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid log filter '{}': {}", directive, e)))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the lifetime of the process.
pub fn init_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(settings)?;

    let (file_layer, guard) = match &settings.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let file_appender = tracing_appender::rolling::daily(directory, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(guard)
}
