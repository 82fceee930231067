//! Configuration for the fulfilment pipeline.
//!
//! [`FulfilmentConfig`] groups one struct per concern. Every struct has
//! working defaults and builder-style setters; [`ConfigFile`] loads the
//! same structure from an INI file.

mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{DEFAULT_PAYLOAD_CONTAINER, DEFAULT_SPILL_THRESHOLD_BYTES};
use crate::model::ExchangeSetLayout;
use crate::queue::SizeClassThresholds;
use crate::search::{DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_PAGE_SIZE, DEFAULT_PARALLEL_SEARCH_TASKS};
use crate::upload::{effective_block_size, UploadSettings, DEFAULT_BLOCK_SIZE, ZIP_MIME_TYPE};

pub use file::{default_config_path, ConfigError, ConfigFile};

/// Remote file repository connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Pre-acquired bearer token.
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl RemoteConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Where cached search results and files live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheProvider {
    /// Table rows and blobs under [`CacheConfig::directory`].
    #[default]
    Disk,
    /// Process memory; lost on exit.
    Memory,
}

impl CacheProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Memory => "memory",
        }
    }

    pub fn from_config_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disk" => Some(Self::Disk),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Search-result cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub provider: CacheProvider,
    pub directory: PathBuf,
    pub spill_threshold_bytes: usize,
    pub payload_container: String,
    /// Capacity of the in-memory blob store.
    pub memory_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: CacheProvider::Disk,
            directory: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("exchangeset"),
            spill_threshold_bytes: DEFAULT_SPILL_THRESHOLD_BYTES,
            payload_container: DEFAULT_PAYLOAD_CONTAINER.to_string(),
            memory_size_bytes: 256 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_provider(mut self, provider: CacheProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_spill_threshold_bytes(mut self, bytes: usize) -> Self {
        self.spill_threshold_bytes = bytes;
        self
    }
}

/// Remote search and download fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub business_unit: String,
    /// Value of the `ProductCode` clause; `None` omits it.
    pub product_code: Option<String>,
    pub page_size: usize,
    pub parallel_search_tasks: usize,
    pub max_concurrent_downloads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            business_unit: "ADDS".to_string(),
            product_code: Some("AVCS".to_string()),
            page_size: DEFAULT_PAGE_SIZE,
            parallel_search_tasks: DEFAULT_PARALLEL_SEARCH_TASKS,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

impl SearchConfig {
    pub fn with_business_unit(mut self, unit: impl Into<String>) -> Self {
        self.business_unit = unit.into();
        self
    }

    pub fn with_product_code(mut self, code: Option<String>) -> Self {
        self.product_code = code;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_parallel_search_tasks(mut self, tasks: usize) -> Self {
        self.parallel_search_tasks = tasks;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }
}

/// Block upload and commit polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Raw configured block size; clamped by [`UploadConfig::settings`].
    pub block_size_bytes: i64,
    pub max_parallel_blocks: usize,
    pub poll_interval: Duration,
    pub commit_timeout: Duration,
    pub mime_type: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size_bytes: DEFAULT_BLOCK_SIZE as i64,
            max_parallel_blocks: 4,
            poll_interval: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(5 * 60),
            mime_type: ZIP_MIME_TYPE.to_string(),
        }
    }
}

impl UploadConfig {
    pub fn with_block_size_bytes(mut self, bytes: i64) -> Self {
        self.block_size_bytes = bytes;
        self
    }

    pub fn with_max_parallel_blocks(mut self, max: usize) -> Self {
        self.max_parallel_blocks = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Settings for the upload coordinator, with the block size clamped.
    pub fn settings(&self) -> UploadSettings {
        UploadSettings {
            block_size: effective_block_size(self.block_size_bytes),
            max_parallel_blocks: self.max_parallel_blocks.max(1),
            poll_interval: self.poll_interval,
            commit_timeout: self.commit_timeout,
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Exchange set naming and staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSetConfig {
    /// Base name of the standard archive (`V01X01` → `V01X01.zip`).
    pub exchange_set_name: String,
    /// Base name of the AIO archive.
    pub aio_name: String,
    /// Cells delivered in the AIO archive instead of the standard one.
    pub aio_cells: Vec<String>,
    pub work_directory: PathBuf,
    pub layout: ExchangeSetLayout,
    /// Keep the staging tree after a successful upload.
    pub keep_staging: bool,
}

impl Default for ExchangeSetConfig {
    fn default() -> Self {
        Self {
            exchange_set_name: "V01X01".to_string(),
            aio_name: "AIO".to_string(),
            aio_cells: vec!["GB800001".to_string()],
            work_directory: std::env::temp_dir().join("exchangeset"),
            layout: ExchangeSetLayout::Standard,
            keep_staging: false,
        }
    }
}

impl ExchangeSetConfig {
    pub fn with_exchange_set_name(mut self, name: impl Into<String>) -> Self {
        self.exchange_set_name = name.into();
        self
    }

    pub fn with_aio_cells(mut self, cells: Vec<String>) -> Self {
        self.aio_cells = cells;
        self
    }

    pub fn with_work_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.work_directory = directory.into();
        self
    }

    pub fn with_layout(mut self, layout: ExchangeSetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }
}

/// Queue staging and storage routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub thresholds: SizeClassThresholds,
    pub small_instances: u32,
    pub medium_instances: u32,
    pub large_instances: u32,
    /// Directory messages and product lists are written under.
    pub staging_directory: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thresholds: SizeClassThresholds::default(),
            small_instances: 2,
            medium_instances: 2,
            large_instances: 2,
            staging_directory: std::env::temp_dir().join("exchangeset-queue"),
        }
    }
}

impl QueueConfig {
    pub fn with_thresholds(mut self, thresholds: SizeClassThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_instances(mut self, small: u32, medium: u32, large: u32) -> Self {
        self.small_instances = small;
        self.medium_instances = medium;
        self.large_instances = large;
        self
    }

    pub fn with_staging_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.staging_directory = directory.into();
        self
    }
}

/// Log filtering and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Directory for daily rolling log files; `None` logs to the console only.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "exchangeset.log".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FulfilmentConfig {
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub upload: UploadConfig,
    pub exchange_set: ExchangeSetConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl FulfilmentConfig {
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_exchange_set(mut self, exchange_set: ExchangeSetConfig) -> Self {
        self.exchange_set = exchange_set;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}
