//! Domain types shared across the fulfilment pipeline.
//!
//! - [`Product`]: one requested chart cell at one edition
//! - [`BatchEntry`]: one search result from the file repository
//! - [`BatchStatus`]: commit state of a remote batch
//! - [`ExchangeSetLayout`]: standard or large-media staging layout

mod batch;
mod layout;
mod product;

pub use batch::{
    attributes, BatchAttribute, BatchEntry, BatchFile, BatchStatus, FileLinks, Link,
    UnknownBatchStatus,
};
pub use layout::ExchangeSetLayout;
pub use product::{Cancellation, Product, ProductUpdate};
