//! INI configuration file.
//!
//! ```ini
//! [remote]
//! base_url = https://fss.example.com/api
//! request_timeout_secs = 300
//!
//! [search]
//! business_unit = ADDS
//! parallel_search_tasks = 4
//!
//! [upload]
//! block_size_bytes = 1048576
//! commit_timeout_minutes = 5
//!
//! [exchange_set]
//! aio_cells = GB800001, GB800002
//! layout = standard
//! ```
//!
//! Missing sections and keys keep their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::{CacheProvider, FulfilmentConfig};
use crate::model::ExchangeSetLayout;

/// Errors reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for [{section}] {key}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Default configuration path: `<config dir>/exchangeset/config.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("exchangeset").join("config.ini"))
}

/// Loader and renderer for the INI configuration format.
pub struct ConfigFile;

impl ConfigFile {
    /// Load a configuration file, starting from defaults.
    pub fn load(path: &Path) -> Result<FulfilmentConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Load `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<FulfilmentConfig, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(FulfilmentConfig::default())
        }
    }

    /// Parse configuration text.
    pub fn parse(contents: &str) -> Result<FulfilmentConfig, ConfigError> {
        let ini = Ini::load_from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = FulfilmentConfig::default();

        let remote = Section::new(&ini, "remote");
        if let Some(url) = remote.get("base_url") {
            config.remote.base_url = url.to_string();
        }
        if let Some(token) = remote.get("access_token") {
            config.remote.access_token = Some(token.to_string());
        }
        if let Some(secs) = remote.parse::<u64>("request_timeout_secs")? {
            config.remote.request_timeout = Duration::from_secs(secs);
        }

        let cache = Section::new(&ini, "cache");
        if let Some(enabled) = cache.bool("enabled")? {
            config.cache.enabled = enabled;
        }
        if let Some(value) = cache.get("provider") {
            config.cache.provider = CacheProvider::from_config_str(value)
                .ok_or_else(|| cache.invalid("provider", value, "expected disk or memory"))?;
        }
        if let Some(dir) = cache.get("directory") {
            config.cache.directory = PathBuf::from(dir);
        }
        if let Some(bytes) = cache.parse::<usize>("spill_threshold_bytes")? {
            config.cache.spill_threshold_bytes = bytes;
        }
        if let Some(container) = cache.get("payload_container") {
            config.cache.payload_container = container.to_string();
        }
        if let Some(mb) = cache.parse::<u64>("memory_size_mb")? {
            config.cache.memory_size_bytes = mb * 1024 * 1024;
        }

        let search = Section::new(&ini, "search");
        if let Some(unit) = search.get("business_unit") {
            config.search.business_unit = unit.to_string();
        }
        if let Some(code) = search.get("product_code") {
            config.search.product_code = (!code.is_empty()).then(|| code.to_string());
        }
        if let Some(size) = search.positive("page_size")? {
            config.search.page_size = size;
        }
        if let Some(tasks) = search.positive("parallel_search_tasks")? {
            config.search.parallel_search_tasks = tasks;
        }
        if let Some(max) = search.positive("max_concurrent_downloads")? {
            config.search.max_concurrent_downloads = max;
        }

        let upload = Section::new(&ini, "upload");
        if let Some(bytes) = upload.parse::<i64>("block_size_bytes")? {
            config.upload.block_size_bytes = bytes;
        }
        if let Some(max) = upload.positive("max_parallel_blocks")? {
            config.upload.max_parallel_blocks = max;
        }
        if let Some(secs) = upload.parse::<u64>("poll_interval_secs")? {
            config.upload.poll_interval = Duration::from_secs(secs);
        }
        if let Some(minutes) = upload.parse::<u64>("commit_timeout_minutes")? {
            let secs = minutes.checked_mul(60).ok_or_else(|| {
                upload.invalid("commit_timeout_minutes", &minutes.to_string(), "too large")
            })?;
            config.upload.commit_timeout = Duration::from_secs(secs);
        }
        if let Some(mime) = upload.get("mime_type") {
            config.upload.mime_type = mime.to_string();
        }

        let exchange_set = Section::new(&ini, "exchange_set");
        if let Some(name) = exchange_set.get("name") {
            config.exchange_set.exchange_set_name = name.to_string();
        }
        if let Some(name) = exchange_set.get("aio_name") {
            config.exchange_set.aio_name = name.to_string();
        }
        if let Some(cells) = exchange_set.get("aio_cells") {
            config.exchange_set.aio_cells = split_list(cells);
        }
        if let Some(dir) = exchange_set.get("work_directory") {
            config.exchange_set.work_directory = PathBuf::from(dir);
        }
        if let Some(value) = exchange_set.get("layout") {
            config.exchange_set.layout = ExchangeSetLayout::from_config_str(value).ok_or_else(|| {
                exchange_set.invalid("layout", value, "expected standard or large-media")
            })?;
        }
        if let Some(keep) = exchange_set.bool("keep_staging")? {
            config.exchange_set.keep_staging = keep;
        }

        let queue = Section::new(&ini, "queue");
        if let Some(mb) = queue.parse::<u64>("small_max_mb")? {
            config.queue.thresholds.small_max_mb = mb;
        }
        if let Some(mb) = queue.parse::<u64>("medium_max_mb")? {
            config.queue.thresholds.medium_max_mb = mb;
        }
        if let Some(n) = queue.positive_u32("small_instances")? {
            config.queue.small_instances = n;
        }
        if let Some(n) = queue.positive_u32("medium_instances")? {
            config.queue.medium_instances = n;
        }
        if let Some(n) = queue.positive_u32("large_instances")? {
            config.queue.large_instances = n;
        }
        if let Some(dir) = queue.get("staging_directory") {
            config.queue.staging_directory = PathBuf::from(dir);
        }
        if config.queue.thresholds.medium_max_mb < config.queue.thresholds.small_max_mb {
            return Err(ConfigError::InvalidValue {
                section: "queue",
                key: "medium_max_mb",
                value: config.queue.thresholds.medium_max_mb.to_string(),
                reason: "must not be below small_max_mb".to_string(),
            });
        }

        let logging = Section::new(&ini, "logging");
        if let Some(level) = logging.get("level") {
            config.logging.level = level.to_string();
        }
        if let Some(dir) = logging.get("directory") {
            config.logging.directory = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(prefix) = logging.get("file_prefix") {
            config.logging.file_prefix = prefix.to_string();
        }

        Ok(config)
    }

    /// Render a configuration in the file format. The access token is masked.
    pub fn render(config: &FulfilmentConfig) -> String {
        let mut ini = Ini::new();

        ini.with_section(Some("remote"))
            .set("base_url", config.remote.base_url.as_str())
            .set(
                "access_token",
                if config.remote.access_token.is_some() { "********" } else { "" },
            )
            .set(
                "request_timeout_secs",
                config.remote.request_timeout.as_secs().to_string(),
            );

        ini.with_section(Some("cache"))
            .set("enabled", config.cache.enabled.to_string())
            .set("provider", config.cache.provider.as_str())
            .set("directory", config.cache.directory.display().to_string())
            .set(
                "spill_threshold_bytes",
                config.cache.spill_threshold_bytes.to_string(),
            )
            .set("payload_container", config.cache.payload_container.as_str())
            .set(
                "memory_size_mb",
                (config.cache.memory_size_bytes / (1024 * 1024)).to_string(),
            );

        ini.with_section(Some("search"))
            .set("business_unit", config.search.business_unit.as_str())
            .set(
                "product_code",
                config.search.product_code.as_deref().unwrap_or_default(),
            )
            .set("page_size", config.search.page_size.to_string())
            .set(
                "parallel_search_tasks",
                config.search.parallel_search_tasks.to_string(),
            )
            .set(
                "max_concurrent_downloads",
                config.search.max_concurrent_downloads.to_string(),
            );

        ini.with_section(Some("upload"))
            .set("block_size_bytes", config.upload.block_size_bytes.to_string())
            .set(
                "max_parallel_blocks",
                config.upload.max_parallel_blocks.to_string(),
            )
            .set(
                "poll_interval_secs",
                config.upload.poll_interval.as_secs().to_string(),
            )
            .set(
                "commit_timeout_minutes",
                (config.upload.commit_timeout.as_secs() / 60).to_string(),
            )
            .set("mime_type", config.upload.mime_type.as_str());

        ini.with_section(Some("exchange_set"))
            .set("name", config.exchange_set.exchange_set_name.as_str())
            .set("aio_name", config.exchange_set.aio_name.as_str())
            .set("aio_cells", config.exchange_set.aio_cells.join(", "))
            .set(
                "work_directory",
                config.exchange_set.work_directory.display().to_string(),
            )
            .set("layout", config.exchange_set.layout.to_string())
            .set("keep_staging", config.exchange_set.keep_staging.to_string());

        ini.with_section(Some("queue"))
            .set("small_max_mb", config.queue.thresholds.small_max_mb.to_string())
            .set("medium_max_mb", config.queue.thresholds.medium_max_mb.to_string())
            .set("small_instances", config.queue.small_instances.to_string())
            .set("medium_instances", config.queue.medium_instances.to_string())
            .set("large_instances", config.queue.large_instances.to_string())
            .set(
                "staging_directory",
                config.queue.staging_directory.display().to_string(),
            );

        ini.with_section(Some("logging"))
            .set("level", config.logging.level.as_str())
            .set(
                "directory",
                config
                    .logging
                    .directory
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default(),
            )
            .set("file_prefix", config.logging.file_prefix.as_str());

        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ini.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One INI section with typed accessors.
struct Section<'a> {
    name: &'static str,
    props: Option<&'a Properties>,
}

impl<'a> Section<'a> {
    fn new(ini: &'a Ini, name: &'static str) -> Self {
        Self {
            name,
            props: ini.section(Some(name)),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.props.and_then(|p| p.get(key)).map(str::trim)
    }

    fn invalid(&self, key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.name,
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None | Some("") => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|e: T::Err| self.invalid(key, value, e.to_string())),
        }
    }

    fn positive(&self, key: &'static str) -> Result<Option<usize>, ConfigError> {
        match self.parse::<usize>(key)? {
            Some(0) => Err(self.invalid(key, "0", "must be at least 1")),
            other => Ok(other),
        }
    }

    fn positive_u32(&self, key: &'static str) -> Result<Option<u32>, ConfigError> {
        match self.parse::<u32>(key)? {
            Some(0) => Err(self.invalid(key, "0", "must be at least 1")),
            other => Ok(other),
        }
    }

    fn bool(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None | Some("") => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                _ => Err(self.invalid(key, value, "expected true or false")),
            },
        }
    }
}
