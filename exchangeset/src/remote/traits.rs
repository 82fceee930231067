//! Narrow client traits for the file repository.
//!
//! Each pipeline stage depends only on the calls it makes, so tests can fake
//! one responsibility at a time. [`super::FileShareClient`] implements all
//! of them against the HTTP API.

use std::path::Path;

use bytes::Bytes;

use super::types::{CreateBatchRequest, FileManifestEntry, RemoteError, SearchBatchResponse};
use crate::cache::BoxFuture;
use crate::model::BatchStatus;

/// Paged batch search.
pub trait SearchApi: Send + Sync {
    /// Fetch the first page for a filter expression.
    fn first_page<'a>(
        &'a self,
        filter: &'a str,
        page_size: usize,
    ) -> BoxFuture<'a, Result<SearchBatchResponse, RemoteError>>;

    /// Follow a `next` link from a previous page.
    fn next_page<'a>(&'a self, href: &'a str)
        -> BoxFuture<'a, Result<SearchBatchResponse, RemoteError>>;
}

/// Single file download.
pub trait FileDownloader: Send + Sync {
    /// Download `href` to `destination`, returning the bytes written.
    ///
    /// The parent directory must exist.
    fn download_file<'a>(
        &'a self,
        href: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<u64, RemoteError>>;
}

/// Block-based file upload into an open batch.
pub trait BatchFileUploader: Send + Sync {
    /// Register a file before any bytes are sent.
    fn create_file<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        length: u64,
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// Upload one block with its base64 MD5.
    fn upload_block<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        block_id: &'a str,
        data: Bytes,
        content_md5: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// Finalize a file from its ordered block ids.
    fn write_block_list<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        block_ids: &'a [String],
    ) -> BoxFuture<'a, Result<(), RemoteError>>;
}

/// Batch lifecycle: create, commit, poll.
pub trait BatchCommitter: Send + Sync {
    /// Open a new batch, returning its id.
    fn create_batch<'a>(
        &'a self,
        request: &'a CreateBatchRequest,
    ) -> BoxFuture<'a, Result<String, RemoteError>>;

    /// Commit every file of a batch. Called exactly once per batch.
    fn commit_batch<'a>(
        &'a self,
        batch_id: &'a str,
        manifest: &'a [FileManifestEntry],
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// Current commit status.
    fn batch_status<'a>(&'a self, batch_id: &'a str)
        -> BoxFuture<'a, Result<BatchStatus, RemoteError>>;
}
