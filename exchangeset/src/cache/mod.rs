//! Search-result cache.
//!
//! The cache lets a fulfilment skip remote searches for product updates it has
//! already resolved, and skip downloads for files it has already fetched. It
//! is strictly an optimization: every error it raises is treated by callers
//! as a miss.
//!
//! # Architecture
//!
//! ```text
//! CacheStore
//!     │
//!     ├── CacheTable (trait)   metadata rows keyed by product / edition|update|unit
//!     │       ├── MemoryCacheTable
//!     │       └── DiskCacheTable
//!     │
//!     └── BlobStore (trait)    spilled payloads + cached file bytes
//!             ├── MemoryBlobStore
//!             └── DiskBlobStore
//! ```

pub mod providers;
mod store;
mod traits;

pub use store::{
    CacheKey, CachePayload, CacheRecord, CacheStore, DEFAULT_PAYLOAD_CONTAINER,
    DEFAULT_SPILL_THRESHOLD_BYTES,
};
pub use traits::{BlobStore, BoxFuture, CacheTable, StorageError, TableRecord};
