//! Storage traits behind the search-result cache.
//!
//! The cache has two tiers: a metadata table keyed by product and an object
//! store for payloads too large for a table row and for downloaded file bytes.
//! Both are reached through dyn-compatible traits so the store can run against
//! memory, local disk, or a cloud account without changing callers.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by cache storage backends.
///
/// The orchestrator never fails a batch on these; it treats them as misses.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error in a filesystem backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record or payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Conditional operation lost against a concurrent writer.
    #[error("precondition failed for {partition_key}/{row_key}")]
    PreconditionFailed {
        partition_key: String,
        row_key: String,
    },

    /// Backend-specific failure.
    #[error("storage provider error: {0}")]
    Provider(String),
}

/// One row of the cache metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableRecord {
    pub partition_key: String,
    pub row_key: String,
    pub batch_id: String,
    /// Inline JSON payload; empty when the payload lives in blob storage.
    #[serde(default)]
    pub response: String,
    /// Concurrency token assigned by the backend on every write.
    #[serde(default, rename = "ETag")]
    pub etag: String,
}

/// Metadata table with atomic upsert.
pub trait CacheTable: Send + Sync {
    /// Fetch a record.
    fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'_, Result<Option<TableRecord>, StorageError>>;

    /// Insert or replace a record. The backend assigns a fresh ETag.
    fn upsert(&self, record: TableRecord) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Delete a record if its ETag still matches.
    ///
    /// Returns `Ok(false)` when the record no longer exists and
    /// [`StorageError::PreconditionFailed`] when it was rewritten meanwhile.
    fn delete(
        &self,
        partition_key: &str,
        row_key: &str,
        etag: &str,
    ) -> BoxFuture<'_, Result<bool, StorageError>>;
}

/// Object store addressed by container and blob name.
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` when absent.
    fn get(
        &self,
        container: &str,
        name: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>>;

    /// Write or overwrite a blob.
    fn put(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StorageError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_record_wire_names() {
        let record = TableRecord {
            partition_key: "DE416080".to_string(),
            row_key: "9|1|ADDS".to_string(),
            batch_id: "b1".to_string(),
            response: String::new(),
            etag: "W/1".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"PartitionKey\":\"DE416080\""));
        assert!(json.contains("\"RowKey\":\"9|1|ADDS\""));
        assert!(json.contains("\"BatchId\""));
        assert!(json.contains("\"ETag\":\"W/1\""));
    }

    #[test]
    fn test_storage_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
