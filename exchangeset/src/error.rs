//! Error types for the fulfilment pipeline.
//!
//! Every fatal condition is a [`FulfilmentError`] carrying a stable [`EventId`]
//! so operators can tell failure sites apart in logs without parsing messages.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cache::StorageError;
use crate::remote::RemoteError;

/// Result type for fulfilment operations.
pub type FulfilmentResult<T> = Result<T, FulfilmentError>;

/// Stable identifiers for fulfilment failure sites.
///
/// The numeric codes are part of the operational contract: dashboards and
/// alerts key on them, so existing values must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventId {
    /// Search endpoint returned a non-success status or could not be reached.
    SearchFailed,
    /// Requested product updates were missing after search.
    SearchResultsNotFound,
    /// A file download failed.
    DownloadFailed,
    /// A staged file or directory could not be written.
    StagingFailed,
    /// A product's bundle location could not be parsed.
    InvalidBundleLocation,
    /// Zip packaging of a staged directory failed.
    PackagingFailed,
    /// A queue message or its product list could not be written.
    QueueStagingFailed,
    /// Batch creation failed.
    CreateBatchFailed,
    /// Registering a file in a batch failed.
    AddFileFailed,
    /// A block upload failed.
    UploadBlockFailed,
    /// Writing the block list failed.
    WriteBlockListFailed,
    /// The commit call itself failed.
    CommitBatchFailed,
    /// Polling the batch status failed.
    BatchStatusFailed,
    /// The batch reached the `Failed` status.
    BatchCommitFailed,
    /// The batch did not commit within the configured budget.
    BatchCommitTimeout,
    /// Work stopped because a sibling task failed.
    OperationCancelled,
    /// A background task panicked or was aborted.
    TaskFailed,
    /// A file upload state machine was driven out of order.
    InvalidUploadState,
}

impl EventId {
    /// Numeric code reported with each failure.
    pub fn code(&self) -> u32 {
        match self {
            Self::SearchFailed => 805_010,
            Self::SearchResultsNotFound => 805_011,
            Self::DownloadFailed => 805_020,
            Self::StagingFailed => 805_021,
            Self::InvalidBundleLocation => 805_022,
            Self::PackagingFailed => 805_030,
            Self::QueueStagingFailed => 805_035,
            Self::CreateBatchFailed => 805_040,
            Self::AddFileFailed => 805_041,
            Self::UploadBlockFailed => 805_042,
            Self::WriteBlockListFailed => 805_043,
            Self::CommitBatchFailed => 805_050,
            Self::BatchStatusFailed => 805_051,
            Self::BatchCommitFailed => 805_052,
            Self::BatchCommitTimeout => 805_053,
            Self::OperationCancelled => 805_090,
            Self::TaskFailed => 805_091,
            Self::InvalidUploadState => 805_092,
        }
    }

    /// Short name used as a structured log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchFailed => "search_failed",
            Self::SearchResultsNotFound => "search_results_not_found",
            Self::DownloadFailed => "download_failed",
            Self::StagingFailed => "staging_failed",
            Self::InvalidBundleLocation => "invalid_bundle_location",
            Self::PackagingFailed => "packaging_failed",
            Self::QueueStagingFailed => "queue_staging_failed",
            Self::CreateBatchFailed => "create_batch_failed",
            Self::AddFileFailed => "add_file_failed",
            Self::UploadBlockFailed => "upload_block_failed",
            Self::WriteBlockListFailed => "write_block_list_failed",
            Self::CommitBatchFailed => "commit_batch_failed",
            Self::BatchStatusFailed => "batch_status_failed",
            Self::BatchCommitFailed => "batch_commit_failed",
            Self::BatchCommitTimeout => "batch_commit_timeout",
            Self::OperationCancelled => "operation_cancelled",
            Self::TaskFailed => "task_failed",
            Self::InvalidUploadState => "invalid_upload_state",
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// A product whose requested updates could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedProduct {
    pub product_name: String,
    pub edition_number: u32,
    pub update_numbers: Vec<u32>,
}

impl fmt::Display for UnresolvedProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} edition {} updates {:?}",
            self.product_name, self.edition_number, self.update_numbers
        )
    }
}

/// Errors that abort a fulfilment batch.
#[derive(Debug, Error)]
pub enum FulfilmentError {
    /// A remote call failed or returned a non-success status.
    #[error("[{event}] {source}")]
    Remote {
        event: EventId,
        #[source]
        source: RemoteError,
    },

    /// A file of a matched entry could not be downloaded.
    #[error("[{event}] failed to download {file_name} for {product_name}: {source}", event = EventId::DownloadFailed)]
    Download {
        product_name: String,
        file_name: String,
        #[source]
        source: RemoteError,
    },

    /// Completeness violation after search, cache and cancellation replacement.
    #[error(
        "[{event}] search results not found for {}",
        format_unresolved(.unresolved),
        event = EventId::SearchResultsNotFound
    )]
    ResultsNotFound { unresolved: Vec<UnresolvedProduct> },

    /// The remote batch reached the `Failed` status.
    #[error("[{event}] batch {batch_id} failed to commit", event = EventId::BatchCommitFailed)]
    CommitFailed { batch_id: String },

    /// The remote batch did not commit within the allowed time.
    #[error(
        "[{event}] batch {batch_id} not committed after {elapsed:?} (limit {timeout:?})",
        event = EventId::BatchCommitTimeout
    )]
    CommitTimeout {
        batch_id: String,
        elapsed: Duration,
        timeout: Duration,
    },

    /// A product's bundle location does not describe a media folder.
    #[error(
        "[{event}] invalid bundle location {location:?} for {product_name}",
        event = EventId::InvalidBundleLocation
    )]
    InvalidBundleLocation {
        product_name: String,
        location: Option<String>,
    },

    /// Blob or table storage failed on a path where storage is required.
    #[error("[{event}] {source}")]
    Storage {
        event: EventId,
        #[source]
        source: StorageError,
    },

    /// Filesystem failure while staging or reading exchange set content.
    #[error("[{event}] {action} {}: {source}", .path.display())]
    Io {
        event: EventId,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file name from a search result is not a single plain path component.
    #[error(
        "[{event}] refusing to stage {file_name:?} for {product_name}: not a plain file name",
        event = EventId::StagingFailed
    )]
    UnsafeFileName {
        product_name: String,
        file_name: String,
    },

    /// Zip packaging failed.
    #[error("[{event}] failed to package {}: {reason}", .path.display(), event = EventId::PackagingFailed)]
    Packaging { path: PathBuf, reason: String },

    /// A file upload was driven through an invalid state transition.
    #[error("[{event}] {file_name}: cannot move from {from} to {to}", event = EventId::InvalidUploadState)]
    InvalidUploadState {
        file_name: String,
        from: &'static str,
        to: &'static str,
    },

    /// Stopped because another task in the same scope failed.
    #[error("[{event}] operation cancelled", event = EventId::OperationCancelled)]
    Cancelled,

    /// A spawned task panicked or was aborted.
    #[error("[{event}] {0}", event = EventId::TaskFailed)]
    Task(String),
}

fn format_unresolved(unresolved: &[UnresolvedProduct]) -> String {
    unresolved
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl FulfilmentError {
    /// Wraps a remote failure with the event of the call site.
    pub fn remote(event: EventId, source: RemoteError) -> Self {
        Self::Remote { event, source }
    }

    /// Wraps a filesystem failure.
    pub fn io(event: EventId, action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            event,
            action,
            path: path.into(),
            source,
        }
    }

    /// Stable identifier of the failure site.
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Remote { event, .. } | Self::Storage { event, .. } | Self::Io { event, .. } => {
                *event
            }
            Self::Download { .. } => EventId::DownloadFailed,
            Self::ResultsNotFound { .. } => EventId::SearchResultsNotFound,
            Self::CommitFailed { .. } => EventId::BatchCommitFailed,
            Self::CommitTimeout { .. } => EventId::BatchCommitTimeout,
            Self::InvalidBundleLocation { .. } => EventId::InvalidBundleLocation,
            Self::UnsafeFileName { .. } => EventId::StagingFailed,
            Self::Packaging { .. } => EventId::PackagingFailed,
            Self::InvalidUploadState { .. } => EventId::InvalidUploadState,
            Self::Cancelled => EventId::OperationCancelled,
            Self::Task(_) => EventId::TaskFailed,
        }
    }

    /// True when this error only reflects a sibling's failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for FulfilmentError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Task(err.to_string())
        }
    }
}

/// Picks the error to report from a set of task failures.
///
/// The first non-cancellation error is the root cause; cancellations only
/// win when nothing else failed.
pub fn root_cause(errors: impl IntoIterator<Item = FulfilmentError>) -> Option<FulfilmentError> {
    let mut cancelled = None;
    for err in errors {
        if err.is_cancelled() {
            cancelled.get_or_insert(err);
        } else {
            return Some(err);
        }
    }
    cancelled
}
