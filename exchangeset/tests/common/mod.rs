//! In-memory file repository shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use exchangeset::cache::providers::{MemoryBlobStore, MemoryCacheTable};
use exchangeset::cache::{BoxFuture, CacheStore};
use exchangeset::config::FulfilmentConfig;
use exchangeset::fulfilment::FulfilmentClients;
use exchangeset::model::{BatchEntry, BatchFile, BatchStatus, Link};
use exchangeset::remote::{
    BatchCommitter, BatchFileUploader, CreateBatchRequest, FileDownloader, FileManifestEntry,
    PagingLinks, RemoteError, SearchApi, SearchBatchResponse,
};
use exchangeset::upload::content_md5;

/// Entry for `cell` with one file per name in `files`.
pub fn entry(batch_id: &str, cell: &str, edition: u32, update: u32, files: &[&str]) -> BatchEntry {
    let files = files
        .iter()
        .map(|name| BatchFile::new(*name, format!("/batch/{}/files/{}", batch_id, name)))
        .collect();
    BatchEntry::for_cell(batch_id, cell, edition, update, files)
}

/// Entry for `cell` with the conventional `{cell}.{update:03}` file.
pub fn cell_entry(batch_id: &str, cell: &str, edition: u32, update: u32) -> BatchEntry {
    let file = format!("{}.{:03}", cell, update);
    entry(batch_id, cell, edition, update, &[file.as_str()])
}

pub fn memory_cache() -> Arc<CacheStore> {
    Arc::new(CacheStore::new(
        Arc::new(MemoryCacheTable::new()),
        Arc::new(MemoryBlobStore::new(16 * 1024 * 1024)),
    ))
}

/// Configuration with fast commit polling and small blocks.
pub fn test_config() -> FulfilmentConfig {
    let mut config = FulfilmentConfig::default();
    config.exchange_set.aio_cells = Vec::new();
    config.upload.block_size_bytes = 512;
    config.upload.poll_interval = Duration::from_millis(1);
    config.upload.commit_timeout = Duration::from_secs(5);
    config.search.page_size = 2;
    config
}

/// A whole file repository: search, download, upload and commit.
#[derive(Default)]
pub struct FakeRepository {
    entries: Vec<BatchEntry>,
    failing_href: Option<String>,
    pub filters: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
    /// Selected results and page size of every search so far.
    searches: Mutex<Vec<(Vec<BatchEntry>, usize)>>,
    pub created_files: Mutex<Vec<(String, String, u64)>>,
    blocks: Mutex<HashMap<(String, String), HashMap<String, Vec<u8>>>>,
    /// Finalized file contents by `(batch, file)`.
    pub files: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub manifests: Mutex<Vec<(String, Vec<FileManifestEntry>)>>,
    statuses: Mutex<VecDeque<BatchStatus>>,
    pub status_polls: AtomicUsize,
    batches_created: AtomicUsize,
}

impl FakeRepository {
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    /// Fail downloads of `href`.
    pub fn failing_download(mut self, href: impl Into<String>) -> Self {
        self.failing_href = Some(href.into());
        self
    }

    /// Status responses in order; `Committed` once exhausted.
    pub fn with_statuses(self, statuses: Vec<BatchStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn clients(self: &Arc<Self>) -> FulfilmentClients {
        FulfilmentClients {
            search: self.clone(),
            downloader: self.clone(),
            uploader: self.clone(),
            committer: self.clone(),
        }
    }

    pub fn file(&self, batch_id: &str, file_name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(batch_id.to_string(), file_name.to_string()))
            .cloned()
    }

    /// True when `filter` asks for this entry's cell, edition and update.
    fn filter_selects(filter: &str, entry: &BatchEntry) -> bool {
        let (Some(cell), Some(edition), Some(update)) =
            (entry.cell_name(), entry.edition_number(), entry.update_number())
        else {
            return false;
        };
        filter.split(") or (").any(|group| {
            group.contains(&format!("$batch(CellName) eq '{}'", cell))
                && group.contains(&format!("$batch(EditionNumber) eq '{}'", edition))
                && group.contains(&format!("$batch(UpdateNumber) eq '{}'", update))
        })
    }

    fn page(&self, search: usize, start: usize) -> Option<SearchBatchResponse> {
        let searches = self.searches.lock().unwrap();
        let (selected, page_size) = searches.get(search)?;
        let entries: Vec<BatchEntry> = selected.iter().skip(start).take(*page_size).cloned().collect();
        let next = start + entries.len();
        let links = (next < selected.len()).then(|| PagingLinks {
            next: Some(Link {
                href: format!("/batch?search={}&start={}", search, next),
            }),
        });
        Some(SearchBatchResponse {
            count: entries.len() as u32,
            total: selected.len() as u32,
            entries,
            links,
        })
    }
}

fn status(method: &'static str, uri: String, status: u16) -> RemoteError {
    RemoteError::Status {
        method,
        uri,
        status,
    }
}

impl SearchApi for FakeRepository {
    fn first_page<'a>(
        &'a self,
        filter: &'a str,
        page_size: usize,
    ) -> BoxFuture<'a, Result<SearchBatchResponse, RemoteError>> {
        Box::pin(async move {
            self.filters.lock().unwrap().push(filter.to_string());
            let selected: Vec<BatchEntry> = self
                .entries
                .iter()
                .filter(|e| Self::filter_selects(filter, e))
                .cloned()
                .collect();
            let search = {
                let mut searches = self.searches.lock().unwrap();
                searches.push((selected, page_size.max(1)));
                searches.len() - 1
            };
            self.page(search, 0)
                .ok_or_else(|| status("GET", filter.to_string(), 500))
        })
    }

    fn next_page<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, Result<SearchBatchResponse, RemoteError>> {
        Box::pin(async move {
            let query = href.split_once('?').map(|(_, q)| q).unwrap_or_default();
            let param = |name: &str| -> Option<usize> {
                query
                    .split('&')
                    .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
                    .and_then(|v| v.parse().ok())
            };
            param("search")
                .zip(param("start"))
                .and_then(|(search, start)| self.page(search, start))
                .ok_or_else(|| status("GET", href.to_string(), 400))
        })
    }
}

impl FileDownloader for FakeRepository {
    fn download_file<'a>(
        &'a self,
        href: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<u64, RemoteError>> {
        Box::pin(async move {
            self.downloads.lock().unwrap().push(href.to_string());
            if self.failing_href.as_deref() == Some(href) {
                return Err(status("GET", href.to_string(), 503));
            }
            tokio::fs::write(destination, href.as_bytes())
                .await
                .map_err(|source| RemoteError::Io {
                    path: destination.to_path_buf(),
                    source,
                })?;
            Ok(href.len() as u64)
        })
    }
}

impl BatchFileUploader for FakeRepository {
    fn create_file<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        length: u64,
        _mime_type: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.created_files.lock().unwrap().push((
                batch_id.to_string(),
                file_name.to_string(),
                length,
            ));
            Ok(())
        })
    }

    fn upload_block<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        block_id: &'a str,
        data: Bytes,
        md5: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            if content_md5(&data) != md5 {
                return Err(status(
                    "PUT",
                    format!("/batch/{}/files/{}/{}", batch_id, file_name, block_id),
                    400,
                ));
            }
            self.blocks
                .lock()
                .unwrap()
                .entry((batch_id.to_string(), file_name.to_string()))
                .or_default()
                .insert(block_id.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn write_block_list<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        block_ids: &'a [String],
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let key = (batch_id.to_string(), file_name.to_string());
            let blocks = self.blocks.lock().unwrap().remove(&key).unwrap_or_default();
            let mut content = Vec::new();
            for id in block_ids {
                let block = blocks
                    .get(id)
                    .ok_or_else(|| status("PUT", format!("/batch/{}/files/{}", batch_id, file_name), 400))?;
                content.extend_from_slice(block);
            }
            self.files.lock().unwrap().insert(key, content);
            Ok(())
        })
    }
}

impl BatchCommitter for FakeRepository {
    fn create_batch<'a>(
        &'a self,
        _request: &'a CreateBatchRequest,
    ) -> BoxFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            let n = self.batches_created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("batch-{}", n))
        })
    }

    fn commit_batch<'a>(
        &'a self,
        batch_id: &'a str,
        manifest: &'a [FileManifestEntry],
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.manifests
                .lock()
                .unwrap()
                .push((batch_id.to_string(), manifest.to_vec()));
            Ok(())
        })
    }

    fn batch_status<'a>(
        &'a self,
        _batch_id: &'a str,
    ) -> BoxFuture<'a, Result<BatchStatus, RemoteError>> {
        Box::pin(async move {
            self.status_polls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(BatchStatus::Committed))
        })
    }
}
