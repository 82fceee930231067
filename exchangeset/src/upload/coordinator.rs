//! Chunked upload of packaged files and batch commit.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::blocks::{encode_md5, plan_blocks, UploadBlock, DEFAULT_BLOCK_SIZE};
use super::state::{FileUpload, FileUploadState};
use crate::error::{EventId, FulfilmentError, FulfilmentResult};
use crate::model::BatchStatus;
use crate::remote::{
    BatchCommitter, BatchFileUploader, CreateBatchRequest, FileManifestEntry, RemoteError,
};
use crate::scope::TaskScope;

/// Default MIME type registered for uploaded archives.
pub const ZIP_MIME_TYPE: &str = "application/zip";

/// Tunables for upload and commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    /// Effective block size in bytes (already clamped).
    pub block_size: usize,
    pub max_parallel_blocks: usize,
    pub poll_interval: Duration,
    pub commit_timeout: Duration,
    pub mime_type: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_parallel_blocks: 4,
            poll_interval: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(5 * 60),
            mime_type: ZIP_MIME_TYPE.to_string(),
        }
    }
}

/// A file whose blocks are written, ready for the commit manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub size: u64,
    /// Base64 MD5 of the whole file.
    pub hash: String,
    pub blocks: usize,
}

impl UploadedFile {
    pub fn manifest_entry(&self) -> FileManifestEntry {
        FileManifestEntry {
            filename: self.file_name.clone(),
            hash: self.hash.clone(),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub polls: u32,
    pub elapsed: Duration,
}

/// Block ids in upload order plus the whole-file hash.
struct UploadedBlocks {
    block_ids: Vec<String>,
    hash: String,
}

/// Uploads files block by block and commits the batch.
#[derive(Clone)]
pub struct UploadCommitCoordinator {
    uploader: Arc<dyn BatchFileUploader>,
    committer: Arc<dyn BatchCommitter>,
    settings: UploadSettings,
}

fn remote_failure(event: EventId, batch_id: &str, source: RemoteError) -> FulfilmentError {
    error!(
        event_id = event.as_str(),
        batch_id,
        uri = source.uri(),
        status = source.status(),
        error = %source,
        "Remote call failed"
    );
    FulfilmentError::remote(event, source)
}

impl UploadCommitCoordinator {
    pub fn new(
        uploader: Arc<dyn BatchFileUploader>,
        committer: Arc<dyn BatchCommitter>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            uploader,
            committer,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Open a new batch and return its id.
    pub async fn create_batch(&self, request: &CreateBatchRequest) -> FulfilmentResult<String> {
        let batch_id = self
            .committer
            .create_batch(request)
            .await
            .map_err(|e| remote_failure(EventId::CreateBatchFailed, "", e))?;
        info!(batch_id = %batch_id, business_unit = %request.business_unit, "Created batch");
        Ok(batch_id)
    }

    /// Register `upload` in the batch.
    pub async fn create_file(&self, batch_id: &str, upload: &mut FileUpload) -> FulfilmentResult<()> {
        upload.advance(FileUploadState::Created)?;
        self.uploader
            .create_file(batch_id, &upload.file_name, upload.length, &self.settings.mime_type)
            .await
            .map_err(|e| remote_failure(EventId::AddFileFailed, batch_id, e))
    }

    /// Upload every block of `upload`, returning ids in file order.
    ///
    /// Blocks are read in order and sent with at most
    /// `max_parallel_blocks` in flight. The first failure cancels `token`
    /// and stops scheduling; blocks already in flight finish.
    pub async fn upload_blocks(
        &self,
        batch_id: &str,
        upload: &mut FileUpload,
        token: &CancellationToken,
    ) -> FulfilmentResult<Vec<String>> {
        upload.advance(FileUploadState::BlocksUploading)?;
        let uploaded = self.send_blocks(batch_id, upload, token).await?;
        Ok(uploaded.block_ids)
    }

    async fn send_blocks(
        &self,
        batch_id: &str,
        upload: &FileUpload,
        token: &CancellationToken,
    ) -> FulfilmentResult<UploadedBlocks> {
        let path = &upload.path;
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| FulfilmentError::io(EventId::UploadBlockFailed, "open", path, e))?;

        let spans = plan_blocks(upload.length, self.settings.block_size);
        let in_flight = Arc::new(Semaphore::new(self.settings.max_parallel_blocks.max(1)));
        let mut scope = TaskScope::new(token.clone(), self.settings.max_parallel_blocks);
        let mut block_ids = Vec::with_capacity(spans.len());
        let mut whole = Md5::new();

        for span in spans {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let mut data = vec![0u8; span.length];
            file.seek(std::io::SeekFrom::Start(span.offset))
                .await
                .map_err(|e| FulfilmentError::io(EventId::UploadBlockFailed, "seek", path, e))?;
            file.read_exact(&mut data)
                .await
                .map_err(|e| FulfilmentError::io(EventId::UploadBlockFailed, "read", path, e))?;
            whole.update(&data);

            let block = UploadBlock::new(span, &data);
            block_ids.push(block.id.clone());

            let uploader = Arc::clone(&self.uploader);
            let batch_id = batch_id.to_string();
            let file_name = upload.file_name.clone();
            scope.spawn(async move {
                let _permit = permit;
                uploader
                    .upload_block(&batch_id, &file_name, &block.id, Bytes::from(data), &block.content_hash)
                    .await
                    .map_err(|e| remote_failure(EventId::UploadBlockFailed, &batch_id, e))?;
                debug!(file = %file_name, block = %block.id, bytes = block.length, "Uploaded block");
                Ok(())
            });
        }

        scope.join_all().await?;
        // Cancelled from outside before every block was scheduled.
        if token.is_cancelled() {
            return Err(FulfilmentError::Cancelled);
        }

        Ok(UploadedBlocks {
            block_ids,
            hash: encode_md5(whole),
        })
    }

    /// Finalize `upload` from its ordered block ids.
    pub async fn write_block_list(
        &self,
        batch_id: &str,
        upload: &mut FileUpload,
        block_ids: &[String],
    ) -> FulfilmentResult<()> {
        upload.advance(FileUploadState::BlocksWritten)?;
        self.uploader
            .write_block_list(batch_id, &upload.file_name, block_ids)
            .await
            .map_err(|e| remote_failure(EventId::WriteBlockListFailed, batch_id, e))
    }

    /// Create, upload and finalize one local file.
    #[instrument(skip(self, path, token), fields(path = %path.display()))]
    pub async fn upload_file(
        &self,
        batch_id: &str,
        path: &Path,
        token: &CancellationToken,
    ) -> FulfilmentResult<UploadedFile> {
        if token.is_cancelled() {
            return Err(FulfilmentError::Cancelled);
        }

        let length = tokio::fs::metadata(path)
            .await
            .map_err(|e| FulfilmentError::io(EventId::AddFileFailed, "stat", path, e))?
            .len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut upload = FileUpload::new(file_name, path, length);

        self.create_file(batch_id, &mut upload).await?;
        upload.advance(FileUploadState::BlocksUploading)?;
        let uploaded = self.send_blocks(batch_id, &upload, token).await?;
        self.write_block_list(batch_id, &mut upload, &uploaded.block_ids)
            .await?;

        info!(
            batch_id,
            file = %upload.file_name,
            bytes = length,
            blocks = uploaded.block_ids.len(),
            "Uploaded file"
        );
        Ok(UploadedFile {
            file_name: upload.file_name,
            size: length,
            hash: uploaded.hash,
            blocks: uploaded.block_ids.len(),
        })
    }

    /// Commit `files` and wait for the batch to reach a terminal status.
    ///
    /// Polls every `poll_interval`; fails on `Failed` or once
    /// `commit_timeout` has elapsed without `Committed`.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn commit_batch(
        &self,
        batch_id: &str,
        files: &[UploadedFile],
    ) -> FulfilmentResult<CommitOutcome> {
        let manifest: Vec<FileManifestEntry> = files.iter().map(UploadedFile::manifest_entry).collect();
        self.committer
            .commit_batch(batch_id, &manifest)
            .await
            .map_err(|e| remote_failure(EventId::CommitBatchFailed, batch_id, e))?;

        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            let status = self
                .committer
                .batch_status(batch_id)
                .await
                .map_err(|e| remote_failure(EventId::BatchStatusFailed, batch_id, e))?;
            polls += 1;
            let elapsed = started.elapsed();

            match status {
                BatchStatus::Committed => {
                    info!(batch_id, polls, elapsed_ms = elapsed.as_millis() as u64, "Batch committed");
                    return Ok(CommitOutcome { polls, elapsed });
                }
                BatchStatus::Failed => {
                    error!(
                        event_id = EventId::BatchCommitFailed.as_str(),
                        batch_id,
                        polls,
                        "Batch commit failed"
                    );
                    return Err(FulfilmentError::CommitFailed {
                        batch_id: batch_id.to_string(),
                    });
                }
                BatchStatus::CommitInProgress => {
                    debug!(batch_id, polls, "Commit in progress");
                }
            }

            if elapsed >= self.settings.commit_timeout {
                warn!(
                    event_id = EventId::BatchCommitTimeout.as_str(),
                    batch_id,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch commit timed out"
                );
                return Err(FulfilmentError::CommitTimeout {
                    batch_id: batch_id.to_string(),
                    elapsed,
                    timeout: self.settings.commit_timeout,
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use crate::cache::BoxFuture;
    use crate::upload::content_md5;

    /// Records blocks and reconstructs files from block lists.
    #[derive(Default)]
    struct FakeRepository {
        created: Mutex<Vec<(String, u64)>>,
        blocks: Mutex<HashMap<(String, String), Bytes>>,
        upload_order: Mutex<Vec<String>>,
        files: Mutex<HashMap<String, Vec<u8>>>,
        fail_block: Option<String>,
        /// Delay per block so later blocks finish first.
        reverse_delays: bool,
        statuses: Mutex<VecDeque<BatchStatus>>,
        status_calls: Mutex<u32>,
        manifests: Mutex<Vec<Vec<FileManifestEntry>>>,
    }

    impl BatchFileUploader for FakeRepository {
        fn create_file<'a>(
            &'a self,
            _batch_id: &'a str,
            file_name: &'a str,
            length: u64,
            _mime_type: &'a str,
        ) -> BoxFuture<'a, Result<(), RemoteError>> {
            self.created.lock().unwrap().push((file_name.to_string(), length));
            Box::pin(async { Ok(()) })
        }

        fn upload_block<'a>(
            &'a self,
            _batch_id: &'a str,
            file_name: &'a str,
            block_id: &'a str,
            data: Bytes,
            md5: &'a str,
        ) -> BoxFuture<'a, Result<(), RemoteError>> {
            Box::pin(async move {
                if self.reverse_delays {
                    let sequence: u64 = block_id.trim_start_matches("Block_").parse().unwrap();
                    tokio::time::sleep(Duration::from_millis(100 - sequence)).await;
                }
                if self.fail_block.as_deref() == Some(block_id) {
                    return Err(RemoteError::Status {
                        method: "PUT",
                        uri: format!("/batch/b1/files/{}/{}", file_name, block_id),
                        status: 500,
                    });
                }
                assert_eq!(md5, content_md5(&data));
                self.upload_order.lock().unwrap().push(block_id.to_string());
                self.blocks
                    .lock()
                    .unwrap()
                    .insert((file_name.to_string(), block_id.to_string()), data);
                Ok(())
            })
        }

        fn write_block_list<'a>(
            &'a self,
            _batch_id: &'a str,
            file_name: &'a str,
            block_ids: &'a [String],
        ) -> BoxFuture<'a, Result<(), RemoteError>> {
            let blocks = self.blocks.lock().unwrap();
            let mut content = Vec::new();
            for id in block_ids {
                content.extend_from_slice(&blocks[&(file_name.to_string(), id.clone())]);
            }
            self.files.lock().unwrap().insert(file_name.to_string(), content);
            Box::pin(async { Ok(()) })
        }
    }

    impl BatchCommitter for FakeRepository {
        fn create_batch<'a>(
            &'a self,
            _request: &'a CreateBatchRequest,
        ) -> BoxFuture<'a, Result<String, RemoteError>> {
            Box::pin(async { Ok("new-batch".to_string()) })
        }

        fn commit_batch<'a>(
            &'a self,
            _batch_id: &'a str,
            manifest: &'a [FileManifestEntry],
        ) -> BoxFuture<'a, Result<(), RemoteError>> {
            self.manifests.lock().unwrap().push(manifest.to_vec());
            Box::pin(async { Ok(()) })
        }

        fn batch_status<'a>(
            &'a self,
            _batch_id: &'a str,
        ) -> BoxFuture<'a, Result<BatchStatus, RemoteError>> {
            *self.status_calls.lock().unwrap() += 1;
            let status = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(BatchStatus::CommitInProgress);
            Box::pin(async move { Ok(status) })
        }
    }

    fn coordinator(repo: Arc<FakeRepository>, block_size: usize) -> UploadCommitCoordinator {
        UploadCommitCoordinator::new(
            repo.clone(),
            repo,
            UploadSettings {
                block_size,
                max_parallel_blocks: 3,
                poll_interval: Duration::from_secs(5),
                commit_timeout: Duration::from_secs(60),
                ..UploadSettings::default()
            },
        )
    }

    fn write_file(dir: &Path, name: &str, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn test_upload_file_reconstructs_content() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = write_file(dir.path(), "V01X01.zip", 10_000);
        let repo = Arc::new(FakeRepository::default());

        let uploaded = coordinator(repo.clone(), 4096)
            .upload_file("b1", &path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(uploaded.blocks, 3);
        assert_eq!(uploaded.size, 10_000);
        assert_eq!(uploaded.hash, content_md5(&data));
        assert_eq!(repo.created.lock().unwrap()[0], ("V01X01.zip".to_string(), 10_000));
        assert_eq!(repo.files.lock().unwrap()["V01X01.zip"], data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_block_completion_keeps_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = write_file(dir.path(), "AIO.zip", 5 * 100);

        let mut uploads = Vec::new();
        for reverse_delays in [false, true] {
            let repo = Arc::new(FakeRepository {
                reverse_delays,
                ..FakeRepository::default()
            });
            let uploaded = coordinator(repo.clone(), 100)
                .upload_file("b1", &path, &CancellationToken::new())
                .await
                .unwrap();

            let order = repo.upload_order.lock().unwrap().clone();
            assert_eq!(order.len(), 5);
            if reverse_delays {
                let mut sorted = order.clone();
                sorted.sort();
                assert_ne!(order, sorted);
            }
            assert_eq!(repo.files.lock().unwrap()["AIO.zip"], data);
            uploads.push(uploaded);
        }

        assert_eq!(uploads[0], uploads[1]);
        assert_eq!(uploads[1].hash, content_md5(&data));
    }

    #[tokio::test]
    async fn test_block_failure_cancels_and_skips_block_list() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_file(dir.path(), "V01X01.zip", 1000);
        let repo = Arc::new(FakeRepository {
            fail_block: Some("Block_00002".to_string()),
            ..FakeRepository::default()
        });
        let token = CancellationToken::new();

        let err = coordinator(repo.clone(), 100)
            .upload_file("b1", &path, &token)
            .await
            .unwrap_err();

        assert_eq!(err.event_id(), EventId::UploadBlockFailed);
        assert!(token.is_cancelled());
        assert!(repo.files.lock().unwrap().is_empty());
        // Scheduling stopped well before all ten blocks were sent.
        assert!(repo.upload_order.lock().unwrap().len() < 10);
    }

    #[tokio::test]
    async fn test_manual_state_machine_order_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_file(dir.path(), "V01X01.zip", 10);
        let repo = Arc::new(FakeRepository::default());
        let coordinator = coordinator(repo, 100);
        let mut upload = FileUpload::new("V01X01.zip", &path, 10);

        let err = coordinator
            .upload_blocks("b1", &mut upload, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.event_id(), EventId::InvalidUploadState);

        coordinator.create_file("b1", &mut upload).await.unwrap();
        let ids = coordinator
            .upload_blocks("b1", &mut upload, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids, vec!["Block_00001".to_string()]);
        coordinator
            .write_block_list("b1", &mut upload, &ids)
            .await
            .unwrap();
        assert_eq!(upload.state(), FileUploadState::BlocksWritten);
    }

    fn repo_with_statuses(statuses: &[BatchStatus]) -> Arc<FakeRepository> {
        Arc::new(FakeRepository {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..FakeRepository::default()
        })
    }

    fn uploaded(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            size: 1,
            hash: "aGFzaA==".to_string(),
            blocks: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_succeeds_after_three_polls() {
        let repo = repo_with_statuses(&[
            BatchStatus::CommitInProgress,
            BatchStatus::CommitInProgress,
            BatchStatus::Committed,
        ]);
        let outcome = coordinator(repo.clone(), 100)
            .commit_batch("b1", &[uploaded("V01X01.zip"), uploaded("AIO.zip")])
            .await
            .unwrap();

        assert_eq!(outcome.polls, 3);
        assert!(outcome.elapsed >= Duration::from_secs(10));
        assert!(outcome.elapsed < Duration::from_secs(11));
        let manifests = repo.manifests.lock().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0][1].filename, "AIO.zip");
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failed_after_two_polls() {
        let repo = repo_with_statuses(&[BatchStatus::CommitInProgress, BatchStatus::Failed]);
        let err = coordinator(repo.clone(), 100)
            .commit_batch("b1", &[uploaded("V01X01.zip")])
            .await
            .unwrap_err();

        assert!(matches!(err, FulfilmentError::CommitFailed { ref batch_id } if batch_id == "b1"));
        assert_eq!(*repo.status_calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_times_out() {
        let repo = repo_with_statuses(&[]);
        let err = coordinator(repo.clone(), 100)
            .commit_batch("b1", &[uploaded("V01X01.zip")])
            .await
            .unwrap_err();

        match err {
            FulfilmentError::CommitTimeout { elapsed, timeout, .. } => {
                assert_eq!(timeout, Duration::from_secs(60));
                assert!(elapsed >= timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Polled at 0s, 5s, ..., 60s.
        assert_eq!(*repo.status_calls.lock().unwrap(), 13);
    }

    #[tokio::test]
    async fn test_create_batch_returns_id() {
        let repo = Arc::new(FakeRepository::default());
        let request = CreateBatchRequest {
            business_unit: "ADDS".to_string(),
            acl: Default::default(),
            attributes: vec![],
            expiry_date: None,
        };
        let id = coordinator(repo, 100).create_batch(&request).await.unwrap();
        assert_eq!(id, "new-batch");
    }
}
