//! In-memory cache backends.
//!
//! `MemoryCacheTable` keeps rows in a `DashMap` and hands out monotonically
//! increasing ETags. `MemoryBlobStore` wraps `moka::future::Cache` weighted by
//! blob size, so a long-running process cannot grow it without bound.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use moka::future::Cache as MokaCache;

use crate::cache::traits::{BlobStore, BoxFuture, CacheTable, StorageError, TableRecord};

/// Metadata table held in memory.
#[derive(Default)]
pub struct MemoryCacheTable {
    rows: DashMap<(String, String), TableRecord>,
    next_etag: AtomicU64,
    reads: AtomicU64,
}

impl MemoryCacheTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of `get` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl CacheTable for MemoryCacheTable {
    fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'_, Result<Option<TableRecord>, StorageError>> {
        let key = (partition_key.to_string(), row_key.to_string());
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.rows.get(&key).map(|row| row.value().clone()))
        })
    }

    fn upsert(&self, mut record: TableRecord) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let etag = self.next_etag.fetch_add(1, Ordering::Relaxed) + 1;
            record.etag = format!("W/\"{}\"", etag);
            self.rows.insert(
                (record.partition_key.clone(), record.row_key.clone()),
                record,
            );
            Ok(())
        })
    }

    fn delete(
        &self,
        partition_key: &str,
        row_key: &str,
        etag: &str,
    ) -> BoxFuture<'_, Result<bool, StorageError>> {
        let key = (partition_key.to_string(), row_key.to_string());
        let etag = etag.to_string();
        Box::pin(async move {
            let Some(current) = self.rows.get(&key).map(|row| row.etag.clone()) else {
                return Ok(false);
            };
            if current != etag {
                return Err(StorageError::PreconditionFailed {
                    partition_key: key.0,
                    row_key: key.1,
                });
            }
            Ok(self
                .rows
                .remove_if(&key, |_, row| row.etag == etag)
                .is_some())
        })
    }
}

/// Blob store held in a size-bounded moka cache.
pub struct MemoryBlobStore {
    blobs: MokaCache<String, Vec<u8>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBlobStore {
    /// Create a store holding at most `max_size_bytes` of blob data.
    pub fn new(max_size_bytes: u64) -> Self {
        let blobs = MokaCache::builder()
            .weigher(|_key: &String, value: &Vec<u8>| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            blobs,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of `get` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `put` calls served.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

fn blob_key(container: &str, name: &str) -> String {
    format!("{}/{}", container, name)
}

impl BlobStore for MemoryBlobStore {
    fn get(
        &self,
        container: &str,
        name: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let key = blob_key(container, name);
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.blobs.get(&key).await)
        })
    }

    fn put(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        let key = blob_key(container, name);
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.blobs.insert(key, data).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(batch_id: &str) -> TableRecord {
        TableRecord {
            partition_key: "DE416080".to_string(),
            row_key: "9|0|ADDS".to_string(),
            batch_id: batch_id.to_string(),
            response: "{}".to_string(),
            etag: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_assigns_new_etag() {
        let table = MemoryCacheTable::new();
        table.upsert(record("a")).await.unwrap();
        let first = table.get("DE416080", "9|0|ADDS").await.unwrap().unwrap();

        table.upsert(record("b")).await.unwrap();
        let second = table.get("DE416080", "9|0|ADDS").await.unwrap().unwrap();

        assert_ne!(first.etag, second.etag);
        assert_eq!(second.batch_id, "b");
        assert_eq!(table.len(), 1);
        assert_eq!(table.read_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_with_stale_etag_fails() {
        let table = MemoryCacheTable::new();
        table.upsert(record("a")).await.unwrap();
        let stale = table.get("DE416080", "9|0|ADDS").await.unwrap().unwrap();
        table.upsert(record("b")).await.unwrap();

        let result = table.delete("DE416080", "9|0|ADDS", &stale.etag).await;
        assert!(matches!(result, Err(StorageError::PreconditionFailed { .. })));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_row() {
        let table = MemoryCacheTable::new();
        assert!(!table.delete("X", "1|0|ADDS", "W/\"1\"").await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_roundtrip_and_counters() {
        let store = MemoryBlobStore::new(1024 * 1024);
        store.put("batch-1", "A.000", vec![1, 2, 3]).await.unwrap();

        assert_eq!(
            store.get("batch-1", "A.000").await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(store.get("batch-2", "A.000").await.unwrap(), None);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 2);
    }
}
