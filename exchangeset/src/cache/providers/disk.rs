//! Filesystem cache backends.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/table/<partition>/<row>.json    metadata rows
//! <root>/blobs/<container>/<name>        payloads and cached files
//! ```
//!
//! Row keys contain `|`, which is replaced with `~` on disk. ETags are derived
//! from the row content, so two writes of identical content share an ETag.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::cache::traits::{BlobStore, BoxFuture, CacheTable, StorageError, TableRecord};

const TABLE_DIR: &str = "table";
const BLOB_DIR: &str = "blobs";

/// Replace path-hostile characters in a key segment.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '|' => '~',
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

/// Write a file through a temporary sibling so readers never see partial data.
async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Metadata table stored as one JSON file per row.
#[derive(Debug, Clone)]
pub struct DiskCacheTable {
    root: PathBuf,
}

impl DiskCacheTable {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            root: cache_root.into().join(TABLE_DIR),
        }
    }

    fn row_path(&self, partition_key: &str, row_key: &str) -> PathBuf {
        self.root
            .join(sanitize_segment(partition_key))
            .join(format!("{}.json", sanitize_segment(row_key)))
    }

    fn compute_etag(record: &TableRecord) -> String {
        let mut hasher = Sha256::new();
        hasher.update(record.partition_key.as_bytes());
        hasher.update(record.row_key.as_bytes());
        hasher.update(record.batch_id.as_bytes());
        hasher.update(record.response.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("W/\"{}\"", &digest[..16])
    }
}

impl CacheTable for DiskCacheTable {
    fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'_, Result<Option<TableRecord>, StorageError>> {
        let path = self.row_path(partition_key, row_key);
        Box::pin(async move {
            match read_optional(&path).await? {
                Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                None => Ok(None),
            }
        })
    }

    fn upsert(&self, mut record: TableRecord) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            record.etag = Self::compute_etag(&record);
            let path = self.row_path(&record.partition_key, &record.row_key);
            let json = serde_json::to_vec(&record)?;
            write_atomic(&path, &json).await?;
            Ok(())
        })
    }

    fn delete(
        &self,
        partition_key: &str,
        row_key: &str,
        etag: &str,
    ) -> BoxFuture<'_, Result<bool, StorageError>> {
        let path = self.row_path(partition_key, row_key);
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        let etag = etag.to_string();
        Box::pin(async move {
            let Some(bytes) = read_optional(&path).await? else {
                return Ok(false);
            };
            let current: TableRecord = serde_json::from_slice(&bytes)?;
            if current.etag != etag {
                return Err(StorageError::PreconditionFailed {
                    partition_key,
                    row_key,
                });
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Blob store rooted in a directory of containers.
#[derive(Debug, Clone)]
pub struct DiskBlobStore {
    root: PathBuf,
}

impl DiskBlobStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            root: cache_root.into().join(BLOB_DIR),
        }
    }

    fn blob_path(&self, container: &str, name: &str) -> PathBuf {
        self.root
            .join(sanitize_segment(container))
            .join(sanitize_segment(name))
    }
}

impl BlobStore for DiskBlobStore {
    fn get(
        &self,
        container: &str,
        name: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let path = self.blob_path(container, name);
        Box::pin(async move { Ok(read_optional(&path).await?) })
    }

    fn put(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        let path = self.blob_path(container, name);
        Box::pin(async move {
            write_atomic(&path, &data).await?;
            Ok(())
        })
    }
}

/// Outcome of clearing a disk cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearResult {
    pub files_deleted: u64,
    pub bytes_freed: u64,
}

/// Contents of a disk cache, split by tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCacheStats {
    pub table_rows: u64,
    pub table_bytes: u64,
    /// Batch containers holding spilled payloads and cached files.
    pub containers: u64,
    pub blob_files: u64,
    pub blob_bytes: u64,
}

impl DiskCacheStats {
    pub fn total_files(&self) -> u64 {
        self.table_rows + self.blob_files
    }

    pub fn total_bytes(&self) -> u64 {
        self.table_bytes + self.blob_bytes
    }
}

/// Count table rows, containers and blobs under a cache root.
pub fn disk_cache_stats(cache_root: &Path) -> io::Result<DiskCacheStats> {
    let mut stats = DiskCacheStats::default();
    visit_files(&cache_root.join(TABLE_DIR), &mut |_: &Path, len: u64| {
        stats.table_rows += 1;
        stats.table_bytes += len;
        Ok(())
    })?;

    let blob_root = cache_root.join(BLOB_DIR);
    if blob_root.exists() {
        for entry in fs::read_dir(&blob_root)? {
            if entry?.file_type()?.is_dir() {
                stats.containers += 1;
            }
        }
    }
    visit_files(&blob_root, &mut |_: &Path, len: u64| {
        stats.blob_files += 1;
        stats.blob_bytes += len;
        Ok(())
    })?;
    Ok(stats)
}

/// Delete every table row and blob under a cache root.
pub fn clear_disk_cache(cache_root: &Path) -> io::Result<ClearResult> {
    let mut result = ClearResult::default();
    visit_files(cache_root, &mut |path: &Path, len: u64| {
        fs::remove_file(path)?;
        result.files_deleted += 1;
        result.bytes_freed += len;
        Ok(())
    })?;
    for dir in [TABLE_DIR, BLOB_DIR] {
        let path = cache_root.join(dir);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
    }
    Ok(result)
}

fn visit_files(dir: &Path, f: &mut dyn FnMut(&Path, u64) -> io::Result<()>) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            visit_files(&path, f)?;
        } else {
            f(&path, metadata.len())?;
        }
    }
    Ok(())
}
