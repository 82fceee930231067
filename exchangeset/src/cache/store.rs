//! Two-tier cache of previously seen search results.
//!
//! Records live in the metadata table under `(product, edition|update|unit)`.
//! Payloads larger than the spill threshold are written to `{batchId}.json` in
//! the payload container and the row keeps an empty `Response`. Writes to the
//! two tiers are not transactional: a row whose blob never landed simply reads
//! back as a miss.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::traits::{BlobStore, CacheTable, StorageError, TableRecord};
use crate::model::BatchEntry;

/// Default payload size above which responses spill to blob storage (60 KB).
pub const DEFAULT_SPILL_THRESHOLD_BYTES: usize = 60 * 1024;

/// Default container holding spilled payloads.
pub const DEFAULT_PAYLOAD_CONTAINER: &str = "ess-fulfilment-cache";

/// Address of one cached search result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub product_name: String,
    pub edition_number: u32,
    pub update_number: u32,
    pub business_unit: String,
}

impl CacheKey {
    pub fn new(
        product_name: impl Into<String>,
        edition_number: u32,
        update_number: u32,
        business_unit: impl Into<String>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            edition_number,
            update_number,
            business_unit: business_unit.into(),
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.product_name
    }

    pub fn row_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.edition_number, self.update_number, self.business_unit
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key(), self.row_key())
    }
}

/// Where a cached payload was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePayload {
    /// Stored in the table row.
    Inline(String),
    /// Stored in the payload container.
    Blob { blob_name: String, content: String },
}

impl CachePayload {
    pub fn content(&self) -> &str {
        match self {
            Self::Inline(content) | Self::Blob { content, .. } => content,
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob { .. })
    }
}

/// A cache hit with its payload resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub key: CacheKey,
    pub batch_id: String,
    pub payload: CachePayload,
    pub etag: String,
}

impl CacheRecord {
    /// Decode the payload as a batch entry.
    pub fn entry(&self) -> Result<BatchEntry, StorageError> {
        Ok(serde_json::from_str(self.payload.content())?)
    }
}

/// Search-result cache over a metadata table and a blob store.
pub struct CacheStore {
    table: Arc<dyn CacheTable>,
    blobs: Arc<dyn BlobStore>,
    spill_threshold_bytes: usize,
    payload_container: String,
}

impl CacheStore {
    /// Create a store with the default threshold and payload container.
    pub fn new(table: Arc<dyn CacheTable>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            table,
            blobs,
            spill_threshold_bytes: DEFAULT_SPILL_THRESHOLD_BYTES,
            payload_container: DEFAULT_PAYLOAD_CONTAINER.to_string(),
        }
    }

    /// Set the payload size above which payloads spill to blob storage.
    pub fn with_spill_threshold(mut self, bytes: usize) -> Self {
        self.spill_threshold_bytes = bytes;
        self
    }

    /// Set the container used for spilled payloads.
    pub fn with_payload_container(mut self, container: impl Into<String>) -> Self {
        self.payload_container = container.into();
        self
    }

    pub fn spill_threshold_bytes(&self) -> usize {
        self.spill_threshold_bytes
    }

    /// Look up a cached result.
    ///
    /// Returns `Ok(None)` for a missing row, a row without payload or batch
    /// id, and a row whose spilled blob is missing or empty.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StorageError> {
        let Some(row) = self.table.get(key.partition_key(), &key.row_key()).await? else {
            return Ok(None);
        };

        if !row.response.is_empty() {
            return Ok(Some(CacheRecord {
                key: key.clone(),
                batch_id: row.batch_id,
                payload: CachePayload::Inline(row.response),
                etag: row.etag,
            }));
        }

        if row.batch_id.is_empty() {
            debug!(key = %key, "Cache row has neither payload nor batch id");
            return Ok(None);
        }

        let blob_name = payload_blob_name(&row.batch_id);
        let bytes = match self.blobs.get(&self.payload_container, &blob_name).await? {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => {
                warn!(
                    key = %key,
                    blob = %blob_name,
                    "Cache row points at a missing payload blob"
                );
                return Ok(None);
            }
        };
        let content = String::from_utf8(bytes)
            .map_err(|e| StorageError::Provider(format!("payload {} is not UTF-8: {}", blob_name, e)))?;

        Ok(Some(CacheRecord {
            key: key.clone(),
            batch_id: row.batch_id,
            payload: CachePayload::Blob { blob_name, content },
            etag: row.etag,
        }))
    }

    /// Insert or overwrite a cached payload.
    ///
    /// Returns `true` when the payload was spilled to blob storage.
    pub async fn insert(
        &self,
        key: &CacheKey,
        batch_id: &str,
        payload: String,
    ) -> Result<bool, StorageError> {
        let spilled = payload.len() > self.spill_threshold_bytes;
        let response = if spilled {
            let blob_name = payload_blob_name(batch_id);
            self.blobs
                .put(&self.payload_container, &blob_name, payload.into_bytes())
                .await?;
            String::new()
        } else {
            payload
        };

        self.table
            .upsert(TableRecord {
                partition_key: key.partition_key().to_string(),
                row_key: key.row_key(),
                batch_id: batch_id.to_string(),
                response,
                etag: String::new(),
            })
            .await?;

        debug!(key = %key, batch_id, spilled, "Cached search result");
        Ok(spilled)
    }

    /// Cache a batch entry under `key`.
    pub async fn insert_entry(&self, key: &CacheKey, entry: &BatchEntry) -> Result<bool, StorageError> {
        let payload = serde_json::to_string(entry)?;
        self.insert(key, &entry.batch_id, payload).await
    }

    /// Remove a record if it has not been rewritten since it was read.
    pub async fn invalidate(&self, record: &CacheRecord) -> Result<bool, StorageError> {
        self.table
            .delete(
                record.key.partition_key(),
                &record.key.row_key(),
                &record.etag,
            )
            .await
    }

    /// Read a previously cached file from the batch's container.
    pub async fn download_from_cache_container(
        &self,
        file_name: &str,
        batch_id: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.blobs.get(batch_id, file_name).await
    }

    /// Store a downloaded file in the batch's container.
    pub async fn store_file(
        &self,
        batch_id: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.blobs.put(batch_id, file_name, data).await
    }
}

fn payload_blob_name(batch_id: &str) -> String {
    format!("{}.json", batch_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::providers::{MemoryBlobStore, MemoryCacheTable};
    use crate::model::BatchFile;

    fn store_with(threshold: usize) -> (CacheStore, Arc<MemoryCacheTable>, Arc<MemoryBlobStore>) {
        let table = Arc::new(MemoryCacheTable::new());
        let blobs = Arc::new(MemoryBlobStore::new(64 * 1024 * 1024));
        let store = CacheStore::new(table.clone(), blobs.clone()).with_spill_threshold(threshold);
        (store, table, blobs)
    }

    fn sample_entry(file_count: usize) -> BatchEntry {
        let files = (0..file_count)
            .map(|i| BatchFile::new(format!("DE416080.{:03}", i), format!("/files/{}", i)))
            .collect();
        BatchEntry::for_cell("batch-1", "DE416080", 9, 1, files)
    }

    #[test]
    fn test_cache_key_row_key() {
        let key = CacheKey::new("DE416080", 9, 1, "ADDS");
        assert_eq!(key.partition_key(), "DE416080");
        assert_eq!(key.row_key(), "9|1|ADDS");
        assert_eq!(key.to_string(), "DE416080/9|1|ADDS");
    }

    #[tokio::test]
    async fn test_small_payload_stays_inline() {
        let (store, _table, blobs) = store_with(DEFAULT_SPILL_THRESHOLD_BYTES);
        let key = CacheKey::new("DE416080", 9, 1, "ADDS");
        let entry = sample_entry(2);

        let spilled = store.insert_entry(&key, &entry).await.unwrap();
        assert!(!spilled);
        assert_eq!(blobs.write_count(), 0);

        let record = store.lookup(&key).await.unwrap().unwrap();
        assert!(!record.payload.is_blob());
        assert_eq!(record.entry().unwrap(), entry);
    }

    #[tokio::test]
    async fn test_large_payload_spills_to_blob() {
        let (store, table, _blobs) = store_with(256);
        let key = CacheKey::new("DE416080", 9, 1, "ADDS");
        let entry = sample_entry(20);

        let spilled = store.insert_entry(&key, &entry).await.unwrap();
        assert!(spilled);

        let row = table.get("DE416080", "9|1|ADDS").await.unwrap().unwrap();
        assert!(row.response.is_empty());
        assert_eq!(row.batch_id, "batch-1");

        let record = store.lookup(&key).await.unwrap().unwrap();
        assert!(record.payload.is_blob());
        assert_eq!(record.entry().unwrap(), entry);
    }

    #[tokio::test]
    async fn test_missing_spill_blob_is_a_miss() {
        let (store, table, _blobs) = store_with(DEFAULT_SPILL_THRESHOLD_BYTES);
        table
            .upsert(TableRecord {
                partition_key: "DE416080".to_string(),
                row_key: "9|1|ADDS".to_string(),
                batch_id: "orphan".to_string(),
                response: String::new(),
                etag: String::new(),
            })
            .await
            .unwrap();

        let key = CacheKey::new("DE416080", 9, 1, "ADDS");
        assert!(store.lookup(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_row_without_batch_id_is_a_miss() {
        let (store, table, _blobs) = store_with(DEFAULT_SPILL_THRESHOLD_BYTES);
        table
            .upsert(TableRecord {
                partition_key: "DE416080".to_string(),
                row_key: "9|1|ADDS".to_string(),
                batch_id: String::new(),
                response: String::new(),
                etag: String::new(),
            })
            .await
            .unwrap();

        let key = CacheKey::new("DE416080", 9, 1, "ADDS");
        assert!(store.lookup(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_record() {
        let (store, _table, _blobs) = store_with(DEFAULT_SPILL_THRESHOLD_BYTES);
        let key = CacheKey::new("DE416080", 9, 1, "ADDS");
        store.insert_entry(&key, &sample_entry(1)).await.unwrap();

        let record = store.lookup(&key).await.unwrap().unwrap();
        assert!(store.invalidate(&record).await.unwrap());
        assert!(store.lookup(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_container_roundtrip() {
        let (store, _table, _blobs) = store_with(DEFAULT_SPILL_THRESHOLD_BYTES);
        store
            .store_file("batch-1", "DE416080.000", b"cell".to_vec())
            .await
            .unwrap();

        let bytes = store
            .download_from_cache_container("DE416080.000", "batch-1")
            .await
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"cell"[..]));

        let missing = store
            .download_from_cache_container("DE416080.001", "batch-1")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn test_lookup_returns_inserted_payload(
                payload in "[a-zA-Z0-9]{0,2048}",
                threshold in 1usize..1024
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let (store, _table, blobs) = store_with(threshold);
                    let key = CacheKey::new("GB100001", 3, 0, "ADDS");
                    let spilled = store.insert(&key, "b", payload.clone()).await.unwrap();

                    // An empty payload reads back as a miss.
                    let record = store.lookup(&key).await.unwrap();
                    if payload.is_empty() {
                        prop_assert!(record.is_none());
                    } else {
                        let record = record.unwrap();
                        prop_assert_eq!(record.payload.content(), payload.as_str());
                        prop_assert_eq!(record.payload.is_blob(), spilled);
                    }
                    prop_assert_eq!(spilled, payload.len() > threshold);
                    prop_assert_eq!(blobs.write_count() > 0, spilled);
                    Ok::<(), TestCaseError>(())
                })?;
            }
        }
    }
}
