//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use exchangeset::config::{default_config_path, ConfigFile, FulfilmentConfig};
use exchangeset::remote::FileShareClient;
use exchangeset::ExchangeSetLayout;

use crate::error::CliError;

/// Staging layout selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LayoutArg {
    /// One exchange set folder packaged as a single zip
    Standard,
    /// One zip per media folder derived from bundle locations
    LargeMedia,
}

impl From<LayoutArg> for ExchangeSetLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Standard => ExchangeSetLayout::Standard,
            LayoutArg::LargeMedia => ExchangeSetLayout::LargeMedia,
        }
    }
}

/// Path of the configuration file in effect.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(default_config_path)
}

/// Load configuration from an explicit path, or the default location.
///
/// An explicit path must exist. The default location may be absent, in
/// which case built-in defaults apply.
pub fn load_config(explicit: Option<&Path>) -> Result<FulfilmentConfig, CliError> {
    match (explicit, default_config_path()) {
        (Some(path), _) => Ok(ConfigFile::load(path)?),
        (None, Some(path)) => Ok(ConfigFile::load_or_default(&path)?),
        (None, None) => Ok(FulfilmentConfig::default()),
    }
}

/// HTTP client for the file repository described by `config`.
pub fn file_share_client(config: &FulfilmentConfig) -> Result<FileShareClient, CliError> {
    let client = FileShareClient::with_timeout(&config.remote.base_url, config.remote.request_timeout)
        .map_err(|e| CliError::Config(format!("invalid remote.base_url: {}", e)))?;
    Ok(match &config.remote.access_token {
        Some(token) => client.with_access_token(token.clone()),
        None => client,
    })
}

/// Multi-threaded runtime for commands that talk to remote services.
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))
}

/// Format a byte count as a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_layout_arg_conversion() {
        assert_eq!(
            ExchangeSetLayout::from(LayoutArg::LargeMedia),
            ExchangeSetLayout::LargeMedia
        );
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ini");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_config_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[search]\nbusiness_unit = UKHO\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.search.business_unit, "UKHO");
    }
}
