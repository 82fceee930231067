//! Per-file upload state machine.

use std::fmt;
use std::path::PathBuf;

use crate::error::{FulfilmentError, FulfilmentResult};

/// Progress of one file through the upload protocol.
///
/// ```text
/// NotCreated ─► Created ─► BlocksUploading ─► BlocksWritten
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileUploadState {
    NotCreated,
    Created,
    BlocksUploading,
    BlocksWritten,
}

impl FileUploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCreated => "NotCreated",
            Self::Created => "Created",
            Self::BlocksUploading => "BlocksUploading",
            Self::BlocksWritten => "BlocksWritten",
        }
    }

    /// The only state reachable from this one.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::NotCreated => Some(Self::Created),
            Self::Created => Some(Self::BlocksUploading),
            Self::BlocksUploading => Some(Self::BlocksWritten),
            Self::BlocksWritten => None,
        }
    }
}

impl fmt::Display for FileUploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local file being uploaded into a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub path: PathBuf,
    pub length: u64,
    state: FileUploadState,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            file_name: file_name.into(),
            path: path.into(),
            length,
            state: FileUploadState::NotCreated,
        }
    }

    pub fn state(&self) -> FileUploadState {
        self.state
    }

    /// Move to `to`, which must be the next state.
    pub fn advance(&mut self, to: FileUploadState) -> FulfilmentResult<()> {
        if self.state.next() != Some(to) {
            return Err(FulfilmentError::InvalidUploadState {
                file_name: self.file_name.clone(),
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        Ok(())
    }
}
