//! Publishing packaged files into a remote batch.
//!
//! Each file is registered, sent as fixed-size blocks with bounded
//! parallelism, and finalized from its ordered block list. Once every file
//! is written the batch is committed once and its status polled until it
//! settles or the time budget runs out.

mod blocks;
mod coordinator;
mod state;

pub use blocks::{
    block_id, content_md5, effective_block_size, plan_blocks, BlockSpan, UploadBlock,
    DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE,
};
pub use coordinator::{
    CommitOutcome, UploadCommitCoordinator, UploadSettings, UploadedFile, ZIP_MIME_TYPE,
};
pub use state::{FileUpload, FileUploadState};
