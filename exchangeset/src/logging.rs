//! Tracing subscriber setup.
//!
//! Console output goes to stderr with local RFC 3339 timestamps. When a log
//! directory is configured a second, non-blocking layer writes daily rolling
//! files there; the returned guard must be held until exit so buffered lines
//! are flushed.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter used when the configured level does not parse.
const FALLBACK_FILTER: &str = "info";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over [`LoggingConfig::level`].
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level));

    let console = fmt::layer()
        .with_target(false)
        .with_timer(LocalTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(LocalTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Filter for a configured level directive such as `info` or
/// `exchangeset=debug,reqwest=warn`.
pub fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}
