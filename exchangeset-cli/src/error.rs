//! CLI error type and exit codes.

use std::fmt;
use std::path::PathBuf;

use exchangeset::config::ConfigError;
use exchangeset::FulfilmentError;

/// Errors surfaced by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    Config(String),
    /// Logging could not be initialized.
    Logging(String),
    /// Async runtime could not be started.
    Runtime(String),
    /// A message or product list file could not be read or written.
    Io { path: PathBuf, message: String },
    /// A message or product list file is not valid JSON.
    Json { path: PathBuf, message: String },
    /// The fulfilment pipeline failed.
    Fulfilment(FulfilmentError),
    CacheClear(String),
    CacheStats(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Logging(_) | CliError::Runtime(_) => 3,
            CliError::Io { .. } | CliError::Json { .. } => 4,
            CliError::Fulfilment(FulfilmentError::Cancelled) => 130,
            CliError::Fulfilment(_) => 1,
            CliError::CacheClear(_) | CliError::CacheStats(_) => 5,
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        CliError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn json(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        CliError::Json {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Runtime(msg) => write!(f, "Failed to start async runtime: {}", msg),
            CliError::Io { path, message } => write!(f, "{}: {}", path.display(), message),
            CliError::Json { path, message } => {
                write!(f, "Invalid JSON in {}: {}", path.display(), message)
            }
            CliError::Fulfilment(e) => write!(f, "Fulfilment failed: {}", e),
            CliError::CacheClear(msg) => write!(f, "Failed to clear cache: {}", msg),
            CliError::CacheStats(msg) => write!(f, "Failed to read cache statistics: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Fulfilment(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<FulfilmentError> for CliError {
    fn from(e: FulfilmentError) -> Self {
        CliError::Fulfilment(e)
    }
}
