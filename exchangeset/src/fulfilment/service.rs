//! End-to-end fulfilment of one batch.
//!
//! ```text
//! work/{batchId}/
//!     V01X01/ENC_ROOT/...      standard exchange set (or M0nX02/... for large media)
//!     AIO/ENC_ROOT/...         AIO cells
//!     V01X01.zip, AIO.zip      packaged archives (M0nX02.zip per media folder)
//! ```
//!
//! Resolution of both partitions shares one cancellation token. Packaging and
//! upload run per archive in parallel under a second token, followed by a
//! single commit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::providers::{DiskBlobStore, DiskCacheTable, MemoryBlobStore, MemoryCacheTable};
use crate::cache::CacheStore;
use crate::config::{CacheConfig, CacheProvider, FulfilmentConfig};
use crate::download::DownloadCoordinator;
use crate::error::{root_cause, EventId, FulfilmentError, FulfilmentResult};
use crate::model::{ExchangeSetLayout, Product};
use crate::package::{media_folders, PackagingStep};
use crate::remote::{
    Acl, BatchCommitter, BatchFileUploader, CreateBatchRequest, FileDownloader, FileShareClient,
    SearchApi, SearchFilterTemplate,
};
use crate::scope::TaskScope;
use crate::search::{RemoteSearchClient, ResolveRequest, ResolvedBatch, SearchCacheOrchestrator};
use crate::upload::{CommitOutcome, UploadCommitCoordinator, UploadedFile};

/// Remote collaborators of the pipeline.
#[derive(Clone)]
pub struct FulfilmentClients {
    pub search: Arc<dyn SearchApi>,
    pub downloader: Arc<dyn FileDownloader>,
    pub uploader: Arc<dyn BatchFileUploader>,
    pub committer: Arc<dyn BatchCommitter>,
}

impl FulfilmentClients {
    /// Use one HTTP client for every role.
    pub fn from_http(client: FileShareClient) -> Self {
        let client = Arc::new(client);
        Self {
            search: client.clone(),
            downloader: client.clone(),
            uploader: client.clone(),
            committer: client,
        }
    }
}

/// Cache store described by `config`, or `None` when caching is disabled.
pub fn cache_store_from_config(config: &CacheConfig) -> Option<Arc<CacheStore>> {
    if !config.enabled {
        return None;
    }
    let store = match config.provider {
        CacheProvider::Disk => CacheStore::new(
            Arc::new(DiskCacheTable::new(&config.directory)),
            Arc::new(DiskBlobStore::new(&config.directory)),
        ),
        CacheProvider::Memory => CacheStore::new(
            Arc::new(MemoryCacheTable::new()),
            Arc::new(MemoryBlobStore::new(config.memory_size_bytes)),
        ),
    };
    Some(Arc::new(
        store
            .with_spill_threshold(config.spill_threshold_bytes)
            .with_payload_container(config.payload_container.clone()),
    ))
}

/// One batch to fulfil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilmentRequest {
    pub batch_id: String,
    pub business_unit: String,
    pub products: Vec<Product>,
    pub layout: ExchangeSetLayout,
    pub work_directory: PathBuf,
}

/// Result of a committed fulfilment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilmentOutcome {
    pub batch_id: String,
    pub staging_directory: PathBuf,
    pub standard: Option<ResolvedBatch>,
    pub aio: Option<ResolvedBatch>,
    /// Uploaded archives, sorted by file name.
    pub archives: Vec<UploadedFile>,
    pub commit: CommitOutcome,
}

impl FulfilmentOutcome {
    fn partitions(&self) -> impl Iterator<Item = &ResolvedBatch> {
        self.standard.iter().chain(self.aio.iter())
    }

    pub fn file_count(&self) -> usize {
        self.partitions().map(ResolvedBatch::file_count).sum()
    }

    pub fn cache_hits(&self) -> usize {
        self.partitions().map(|b| b.cache_hits).sum()
    }

    pub fn remote_matches(&self) -> usize {
        self.partitions().map(|b| b.remote_matches).sum()
    }

    pub fn searches(&self) -> usize {
        self.partitions().map(|b| b.searches).sum()
    }
}

/// A staged directory and the archive it becomes.
#[derive(Debug, Clone)]
struct ArchiveJob {
    source: PathBuf,
    archive: PathBuf,
}

/// Drives search, download, packaging, upload and commit for a batch.
pub struct FulfilmentService {
    orchestrator: Arc<SearchCacheOrchestrator>,
    uploads: UploadCommitCoordinator,
    packaging: PackagingStep,
    exchange_set_name: String,
    aio_name: String,
    aio_cells: HashSet<String>,
    keep_staging: bool,
}

impl FulfilmentService {
    pub fn new(orchestrator: SearchCacheOrchestrator, uploads: UploadCommitCoordinator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            uploads,
            packaging: PackagingStep::default(),
            exchange_set_name: "V01X01".to_string(),
            aio_name: "AIO".to_string(),
            aio_cells: HashSet::new(),
            keep_staging: false,
        }
    }

    /// Wire a service from configuration and remote clients.
    pub fn from_config(
        config: &FulfilmentConfig,
        clients: FulfilmentClients,
        cache: Option<Arc<CacheStore>>,
    ) -> Self {
        let search = RemoteSearchClient::new(clients.search)
            .with_template(SearchFilterTemplate::for_product_code(
                config.search.product_code.as_deref(),
            ))
            .with_page_size(config.search.page_size);

        let mut orchestrator =
            SearchCacheOrchestrator::new(Arc::new(search), DownloadCoordinator::new(clients.downloader))
                .with_parallel_search_tasks(config.search.parallel_search_tasks)
                .with_max_concurrent_downloads(config.search.max_concurrent_downloads);
        if let Some(cache) = cache {
            orchestrator = orchestrator.with_cache(cache);
        }

        let uploads = UploadCommitCoordinator::new(
            clients.uploader,
            clients.committer,
            config.upload.settings(),
        );

        Self::new(orchestrator, uploads)
            .with_exchange_set_name(&config.exchange_set.exchange_set_name)
            .with_aio(&config.exchange_set.aio_name, config.exchange_set.aio_cells.iter().cloned())
            .with_keep_staging(config.exchange_set.keep_staging)
    }

    pub fn with_exchange_set_name(mut self, name: impl Into<String>) -> Self {
        self.exchange_set_name = name.into();
        self
    }

    /// Name of the AIO archive and the cells that go into it.
    pub fn with_aio(mut self, name: impl Into<String>, cells: impl IntoIterator<Item = String>) -> Self {
        self.aio_name = name.into();
        self.aio_cells = cells.into_iter().map(|c| c.to_uppercase()).collect();
        self
    }

    pub fn with_packaging(mut self, packaging: PackagingStep) -> Self {
        self.packaging = packaging;
        self
    }

    pub fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    /// Open a new batch for `business_unit`.
    pub async fn create_batch(&self, business_unit: &str) -> FulfilmentResult<String> {
        self.uploads
            .create_batch(&CreateBatchRequest {
                business_unit: business_unit.to_string(),
                acl: Acl::default(),
                attributes: Vec::new(),
                expiry_date: None,
            })
            .await
    }

    fn is_aio(&self, product: &Product) -> bool {
        self.aio_cells.contains(&product.product_name.to_uppercase())
    }

    /// Fulfil and commit one batch.
    #[instrument(skip_all, fields(batch_id = %request.batch_id, layout = %request.layout))]
    pub async fn fulfil(&self, request: &FulfilmentRequest) -> FulfilmentResult<FulfilmentOutcome> {
        let stage = request.work_directory.join(&request.batch_id);
        tokio::fs::create_dir_all(&stage)
            .await
            .map_err(|e| FulfilmentError::io(EventId::StagingFailed, "create", &stage, e))?;

        let result = self.fulfil_staged(request, stage.clone()).await;

        if !self.keep_staging {
            if let Err(e) = tokio::fs::remove_dir_all(&stage).await {
                warn!(stage = %stage.display(), error = %e, "Failed to remove staging directory");
            }
        }

        let outcome = result?;
        info!(
            archives = outcome.archives.len(),
            files = outcome.file_count(),
            cache_hits = outcome.cache_hits(),
            remote_matches = outcome.remote_matches(),
            polls = outcome.commit.polls,
            "Batch fulfilled"
        );
        Ok(outcome)
    }

    /// Resolve, package, upload and commit inside an existing stage directory.
    async fn fulfil_staged(
        &self,
        request: &FulfilmentRequest,
        stage: PathBuf,
    ) -> FulfilmentResult<FulfilmentOutcome> {
        let (aio, standard): (Vec<Product>, Vec<Product>) =
            request.products.iter().cloned().partition(|p| self.is_aio(p));
        let standard_root = stage.join(&self.exchange_set_name);
        let aio_root = stage.join(&self.aio_name);

        info!(
            standard = standard.len(),
            aio = aio.len(),
            stage = %stage.display(),
            "Fulfilling batch"
        );

        let token = CancellationToken::new();
        let (standard_result, aio_result) = tokio::join!(
            self.resolve_partition(request, &standard, &standard_root, request.layout, &token),
            self.resolve_partition(request, &aio, &aio_root, ExchangeSetLayout::Standard, &token),
        );
        let (standard_batch, aio_batch) = match (standard_result, aio_result) {
            (Ok(standard), Ok(aio)) => (standard, aio),
            (standard, aio) => {
                token.cancel();
                let errors = [standard.err(), aio.err()].into_iter().flatten();
                return Err(root_cause(errors).unwrap_or(FulfilmentError::Cancelled));
            }
        };

        let mut jobs = Vec::new();
        if standard_batch.is_some() {
            jobs.extend(self.standard_jobs(&stage, &standard_root, request.layout)?);
        }
        if aio_batch.is_some() {
            jobs.push(ArchiveJob {
                source: aio_root,
                archive: stage.join(format!("{}.zip", self.aio_name)),
            });
        }

        let archives = self.publish(&request.batch_id, jobs).await?;
        let commit = self.uploads.commit_batch(&request.batch_id, &archives).await?;

        Ok(FulfilmentOutcome {
            batch_id: request.batch_id.clone(),
            staging_directory: stage,
            standard: standard_batch,
            aio: aio_batch,
            archives,
            commit,
        })
    }

    async fn resolve_partition(
        &self,
        request: &FulfilmentRequest,
        products: &[Product],
        destination: &Path,
        layout: ExchangeSetLayout,
        token: &CancellationToken,
    ) -> FulfilmentResult<Option<ResolvedBatch>> {
        if products.is_empty() {
            return Ok(None);
        }
        let resolve = ResolveRequest {
            business_unit: &request.business_unit,
            products,
            destination,
            layout,
        };
        self.orchestrator.resolve(&resolve, token).await.map(Some)
    }

    fn standard_jobs(
        &self,
        stage: &Path,
        root: &Path,
        layout: ExchangeSetLayout,
    ) -> FulfilmentResult<Vec<ArchiveJob>> {
        if !layout.is_large_media() {
            return Ok(vec![ArchiveJob {
                source: root.to_path_buf(),
                archive: stage.join(format!("{}.zip", self.exchange_set_name)),
            }]);
        }

        let jobs = media_folders(root)?
            .into_iter()
            .filter_map(|folder| {
                let name = folder.file_name()?.to_string_lossy().into_owned();
                Some(ArchiveJob {
                    archive: stage.join(format!("{}.zip", name)),
                    source: folder,
                })
            })
            .collect();
        Ok(jobs)
    }

    /// Package and upload every archive in parallel; all must succeed.
    async fn publish(&self, batch_id: &str, jobs: Vec<ArchiveJob>) -> FulfilmentResult<Vec<UploadedFile>> {
        let token = CancellationToken::new();
        let mut scope = TaskScope::new(token.clone(), jobs.len());
        for job in jobs {
            let packaging = self.packaging;
            let uploads = self.uploads.clone();
            let batch_id = batch_id.to_string();
            let token = token.clone();
            scope.spawn(async move {
                let archive = packaging.package(&job.source, &job.archive).await?;
                uploads.upload_file(&batch_id, &archive.path, &token).await
            });
        }

        let mut uploaded = scope.join_all().await?;
        uploaded.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(uploaded)
    }
}
