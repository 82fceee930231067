//! Cache storage backends.
//!
//! - [`memory`]: `DashMap` table and moka blob store, for tests and one-shot runs
//! - [`disk`]: JSON rows and blob files under a cache directory

mod disk;
mod memory;

pub use disk::{
    clear_disk_cache, disk_cache_stats, ClearResult, DiskBlobStore, DiskCacheStats, DiskCacheTable,
};
pub use memory::{MemoryBlobStore, MemoryCacheTable};
