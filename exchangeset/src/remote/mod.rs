//! File repository client.
//!
//! The repository exposes batch search, file download, block upload and batch
//! commit over HTTP. The pipeline talks to it through narrow traits so each
//! stage can be tested against a fake.

mod filter;
mod http;
mod traits;
mod types;

pub use filter::SearchFilterTemplate;
pub use http::{FileShareClient, DEFAULT_REQUEST_TIMEOUT};
pub use traits::{BatchCommitter, BatchFileUploader, FileDownloader, SearchApi};
pub use types::{
    Acl, BatchStatusResponse, CreateBatchRequest, CreateBatchResponse, FileManifestEntry,
    PagingLinks, RemoteError, SearchBatchResponse, WriteBlockListRequest,
};
