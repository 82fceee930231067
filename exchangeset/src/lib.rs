//! Exchange set fulfilment
//!
//! This library turns a list of requested chart cells into a committed batch
//! on a remote file repository: it resolves each requested update through a
//! search-result cache or a paginated remote search, downloads the matching
//! files into a staging tree, packages the tree into zip archives, uploads
//! them block by block and commits the batch.
//!
//! # Modules
//!
//! - [`fulfilment`]: the end-to-end pipeline for one batch
//! - [`search`]: cache-first resolution and remote search
//! - [`cache`]: two-tier search-result cache
//! - [`download`]: staging paths and concurrent downloads
//! - [`package`]: zip packaging
//! - [`upload`]: block upload and batch commit
//! - [`remote`]: file repository client traits and HTTP implementation
//! - [`queue`]: queue messages and storage routing
//! - [`config`], [`logging`]: ambient setup

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod fulfilment;
pub mod logging;
pub mod model;
pub mod package;
pub mod queue;
pub mod remote;
pub mod scope;
pub mod search;
pub mod upload;

pub use error::{EventId, FulfilmentError, FulfilmentResult};
pub use fulfilment::{FulfilmentOutcome, FulfilmentRequest, FulfilmentService};
pub use model::{BatchEntry, BatchStatus, ExchangeSetLayout, Product};
