//! Batch fulfilment: the pipeline from a product list to a committed batch.

mod service;

pub use service::{
    cache_store_from_config, FulfilmentClients, FulfilmentOutcome, FulfilmentRequest,
    FulfilmentService,
};
