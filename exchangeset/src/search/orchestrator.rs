//! Cache-first resolution of requested products into staged files.
//!
//! # Flow
//!
//! ```text
//! products ──► cache phase (per product, concurrent)
//!                 │ hit + files materialized ──► ResolvedEntry (Cache)
//!                 │ miss / disagreement ───────► residual updates
//!                 ▼
//!              residual products split into sub-batches
//!                 │ remote search per sub-batch (concurrent)
//!                 │   └─ each accepted entry spawns its download
//!                 │        └─ successful, cacheable downloads populate the cache
//!                 ▼
//!              ResolvedBatch
//! ```
//!
//! Every task shares the caller's token: a failed search or download stops
//! all other cache, search and download work for the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{RemoteSearchClient, SearchSummary};
use super::matcher::MatchedEntry;
use crate::cache::{CacheKey, CacheRecord, CacheStore};
use crate::download::{staged_file_path, update_directory, DownloadCoordinator, DownloadedEntry};
use crate::error::{root_cause, FulfilmentError, FulfilmentResult};
use crate::model::{BatchEntry, ExchangeSetLayout, Product, ProductUpdate};
use crate::scope::TaskScope;

/// Default number of concurrent remote searches.
pub const DEFAULT_PARALLEL_SEARCH_TASKS: usize = 4;

/// Default number of concurrent entry downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 8;

/// How an update was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntrySource {
    Cache,
    Remote,
    CancellationReplacement,
}

/// One requested update with its staged files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub update: ProductUpdate,
    pub source: EntrySource,
    pub batch_id: String,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Every update of a request, resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBatch {
    pub entries: Vec<ResolvedEntry>,
    pub cache_hits: usize,
    pub remote_matches: usize,
    pub replacements: usize,
    pub searches: usize,
    pub search_pages: usize,
}

impl ResolvedBatch {
    pub fn file_count(&self) -> usize {
        self.entries.iter().map(|e| e.files.len()).sum()
    }

    fn absorb(&mut self, entry: ResolvedEntry) {
        match entry.source {
            EntrySource::Cache => self.cache_hits += 1,
            EntrySource::Remote => self.remote_matches += 1,
            EntrySource::CancellationReplacement => {
                self.remote_matches += 1;
                self.replacements += 1;
            }
        }
        self.entries.push(entry);
    }
}

/// Inputs for one resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub business_unit: &'a str,
    pub products: &'a [Product],
    pub destination: &'a Path,
    pub layout: ExchangeSetLayout,
}

/// Outcome of trying to serve one cached record from disk.
enum Materialized {
    Complete(ResolvedEntry),
    Incomplete { declared: usize, present: usize },
    Unavailable(String),
}

/// Per-product result of the cache phase.
struct CachePhase {
    hits: Vec<ResolvedEntry>,
    residual: Option<Product>,
}

/// Shared state every spawned task needs.
#[derive(Clone)]
struct TaskContext {
    cache: Option<Arc<CacheStore>>,
    search: Arc<RemoteSearchClient>,
    downloads: DownloadCoordinator,
    download_permits: Arc<Semaphore>,
    business_unit: String,
    destination: PathBuf,
    layout: ExchangeSetLayout,
    token: CancellationToken,
}

/// Resolves products through the cache first, then remote search.
pub struct SearchCacheOrchestrator {
    cache: Option<Arc<CacheStore>>,
    search: Arc<RemoteSearchClient>,
    downloads: DownloadCoordinator,
    parallel_search_tasks: usize,
    max_concurrent_downloads: usize,
}

impl SearchCacheOrchestrator {
    /// Create an orchestrator without a cache.
    pub fn new(search: Arc<RemoteSearchClient>, downloads: DownloadCoordinator) -> Self {
        Self {
            cache: None,
            search,
            downloads,
            parallel_search_tasks: DEFAULT_PARALLEL_SEARCH_TASKS,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_parallel_search_tasks(mut self, tasks: usize) -> Self {
        self.parallel_search_tasks = tasks.max(1);
        self
    }

    pub fn with_max_concurrent_downloads(mut self, downloads: usize) -> Self {
        self.max_concurrent_downloads = downloads.max(1);
        self
    }

    /// Resolve every update of `request.products` into staged files.
    #[instrument(skip_all, fields(business_unit = %request.business_unit, products = request.products.len()))]
    pub async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        token: &CancellationToken,
    ) -> FulfilmentResult<ResolvedBatch> {
        let context = TaskContext {
            cache: self.cache.clone(),
            search: Arc::clone(&self.search),
            downloads: self.downloads.clone(),
            download_permits: Arc::new(Semaphore::new(self.max_concurrent_downloads)),
            business_unit: request.business_unit.to_string(),
            destination: request.destination.to_path_buf(),
            layout: request.layout,
            token: token.clone(),
        };

        let mut batch = ResolvedBatch::default();
        let residual = match &self.cache {
            Some(cache) => {
                let mut residual = Vec::new();
                for phase in self.cache_phase(cache, request.products, &context).await? {
                    phase.hits.into_iter().for_each(|hit| batch.absorb(hit));
                    residual.extend(phase.residual);
                }
                residual
            }
            None => request.products.to_vec(),
        };

        let residual: Vec<Product> = residual
            .into_iter()
            .filter(|p| !p.update_numbers.is_empty())
            .collect();

        if !residual.is_empty() {
            let chunk_size = residual.len().div_ceil(self.parallel_search_tasks);
            let mut searches = TaskScope::new(token.clone(), self.parallel_search_tasks);
            for chunk in residual.chunks(chunk_size) {
                let context = context.clone();
                let chunk = chunk.to_vec();
                searches.spawn(async move { context.search_and_download(chunk).await });
            }

            for (summary, entries) in searches.join_all().await? {
                batch.searches += 1;
                batch.search_pages += summary.pages;
                entries.into_iter().for_each(|entry| batch.absorb(entry));
            }
        }

        info!(
            updates = batch.entries.len(),
            files = batch.file_count(),
            cache_hits = batch.cache_hits,
            remote_matches = batch.remote_matches,
            replacements = batch.replacements,
            searches = batch.searches,
            "Resolved products"
        );
        Ok(batch)
    }

    async fn cache_phase(
        &self,
        cache: &Arc<CacheStore>,
        products: &[Product],
        context: &TaskContext,
    ) -> FulfilmentResult<Vec<CachePhase>> {
        let mut scope = TaskScope::new(context.token.clone(), self.max_concurrent_downloads);
        for product in products {
            let cache = Arc::clone(cache);
            let context = context.clone();
            let product = product.clone();
            scope.spawn(async move { context.cache_product(&cache, product).await });
        }
        scope.join_all().await
    }
}

impl TaskContext {
    /// Serve what the cache can for one product; return the rest as residual.
    async fn cache_product(
        &self,
        cache: &CacheStore,
        product: Product,
    ) -> FulfilmentResult<CachePhase> {
        let mut hits = Vec::new();
        let mut residual = Vec::new();

        for &update in &product.update_numbers {
            if self.token.is_cancelled() {
                return Err(FulfilmentError::Cancelled);
            }
            if product.is_cancellation_update(update) {
                residual.push(update);
                continue;
            }

            let key = CacheKey::new(
                &product.product_name,
                product.edition_number,
                update,
                &self.business_unit,
            );
            let record = match cache.lookup(&key).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(key = %key, "Never cached, searching remote");
                    residual.push(update);
                    continue;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache unavailable, searching remote");
                    residual.push(update);
                    continue;
                }
            };

            match self.materialize(cache, &record, &product, update).await? {
                Materialized::Complete(hit) => {
                    debug!(key = %key, files = hit.files.len(), "Served from cache");
                    hits.push(hit);
                }
                Materialized::Incomplete { declared, present } => {
                    warn!(
                        key = %key,
                        declared,
                        present,
                        "Cache disagreed with disk, searching remote"
                    );
                    if let Err(e) = cache.invalidate(&record).await {
                        debug!(key = %key, error = %e, "Could not invalidate cache record");
                    }
                    residual.push(update);
                }
                Materialized::Unavailable(reason) => {
                    warn!(key = %key, reason = %reason, "Cache unavailable, searching remote");
                    residual.push(update);
                }
            }
        }

        let residual = (!residual.is_empty()).then(|| product.with_update_numbers(residual));
        Ok(CachePhase { hits, residual })
    }

    /// Make every file of a cached entry present in its update directory.
    async fn materialize(
        &self,
        cache: &CacheStore,
        record: &CacheRecord,
        product: &Product,
        update: u32,
    ) -> FulfilmentResult<Materialized> {
        let entry = match record.entry() {
            Ok(entry) => entry,
            Err(e) => return Ok(Materialized::Unavailable(e.to_string())),
        };

        let directory = update_directory(
            &self.destination,
            product,
            product.edition_number,
            update,
            self.layout,
        )?;
        if let Err(e) = tokio::fs::create_dir_all(&directory).await {
            return Ok(Materialized::Unavailable(e.to_string()));
        }

        let mut files = Vec::with_capacity(entry.files.len());
        for file in &entry.files {
            let path = match staged_file_path(&directory, product, &file.filename) {
                Ok(path) => path,
                Err(e) => return Ok(Materialized::Unavailable(e.to_string())),
            };
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                files.push(path);
                continue;
            }
            match cache
                .download_from_cache_container(&file.filename, &entry.batch_id)
                .await
            {
                Ok(Some(bytes)) => {
                    if let Err(e) = tokio::fs::write(&path, bytes).await {
                        return Ok(Materialized::Unavailable(e.to_string()));
                    }
                    files.push(path);
                }
                Ok(None) => {}
                Err(e) => return Ok(Materialized::Unavailable(e.to_string())),
            }
        }

        if files.len() != entry.files.len() {
            return Ok(Materialized::Incomplete {
                declared: entry.files.len(),
                present: files.len(),
            });
        }

        Ok(Materialized::Complete(ResolvedEntry {
            update: ProductUpdate {
                product_name: product.product_name.clone(),
                edition_number: product.edition_number,
                update_number: update,
            },
            source: EntrySource::Cache,
            batch_id: entry.batch_id,
            directory,
            files,
        }))
    }

    /// Search one sub-batch, downloading each accepted entry as it arrives.
    async fn search_and_download(
        self,
        products: Vec<Product>,
    ) -> FulfilmentResult<(SearchSummary, Vec<ResolvedEntry>)> {
        let mut downloads =
            TaskScope::with_permits(self.token.clone(), Arc::clone(&self.download_permits));

        let searched = self
            .search
            .search(&products, &self.business_unit, &self.token, |matched| {
                let context = self.clone();
                downloads.spawn(async move { context.download_matched(matched).await });
                Ok(())
            })
            .await;
        let downloaded = downloads.join_all().await;

        match (searched, downloaded) {
            (Ok(summary), Ok(entries)) => Ok((summary, entries)),
            (searched, downloaded) => {
                let errors = [searched.err(), downloaded.err()];
                Err(root_cause(errors.into_iter().flatten()).unwrap_or(FulfilmentError::Cancelled))
            }
        }
    }

    async fn download_matched(self, matched: MatchedEntry) -> FulfilmentResult<ResolvedEntry> {
        let downloaded = self
            .downloads
            .download(
                &matched.entry,
                &matched.product,
                matched.update_number,
                &self.destination,
                self.layout,
                &self.token,
            )
            .await?;

        if !matched.entry.ignore_cache {
            if let Some(cache) = &self.cache {
                self.populate_cache(cache, &matched, &downloaded).await;
            }
        }

        let source = if matched.replaced {
            EntrySource::CancellationReplacement
        } else {
            EntrySource::Remote
        };
        Ok(ResolvedEntry {
            update: downloaded.update,
            source,
            batch_id: matched.entry.batch_id,
            directory: downloaded.directory,
            files: downloaded.files,
        })
    }

    /// Store downloaded files and the entry so later requests hit the cache.
    ///
    /// Failures are logged and otherwise ignored.
    async fn populate_cache(
        &self,
        cache: &CacheStore,
        matched: &MatchedEntry,
        downloaded: &DownloadedEntry,
    ) {
        let key = CacheKey::new(
            &matched.product.product_name,
            matched.product.edition_number,
            matched.update_number,
            &self.business_unit,
        );

        if let Err(reason) = store_files(cache, &matched.entry, downloaded).await {
            warn!(key = %key, reason = %reason, "Could not cache downloaded files");
            return;
        }
        match cache.insert_entry(&key, &matched.entry).await {
            Ok(spilled) => debug!(key = %key, spilled, "Cached search result"),
            Err(e) => warn!(key = %key, error = %e, "Could not cache search result"),
        }
    }
}

async fn store_files(
    cache: &CacheStore,
    entry: &BatchEntry,
    downloaded: &DownloadedEntry,
) -> Result<(), String> {
    for (file, path) in entry.files.iter().zip(&downloaded.files) {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        cache
            .store_file(&entry.batch_id, &file.filename, bytes)
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}
