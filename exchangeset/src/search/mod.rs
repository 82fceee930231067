//! Resolution of requested products to batch entries.
//!
//! [`SearchCacheOrchestrator`] is the entry point: it serves what it can from
//! the cache and hands the residual to [`RemoteSearchClient`], which pages
//! through the repository and feeds accepted entries to the download stage.

mod client;
mod matcher;
mod orchestrator;

pub use client::{RemoteSearchClient, SearchSummary, DEFAULT_PAGE_SIZE};
pub use matcher::{MatchedEntry, SearchMatcher};
pub use orchestrator::{
    EntrySource, ResolveRequest, ResolvedBatch, ResolvedEntry, SearchCacheOrchestrator,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_PARALLEL_SEARCH_TASKS,
};
