//! Hand-off between request staging and fulfilment workers.

mod message;
mod selector;
mod stager;

pub use message::{FulfilmentMessage, ProductList, EXCHANGE_SET_STANDARD};
pub use selector::{
    ClassCounters, InstanceCounter, RotatingCounter, SizeClass, SizeClassThresholds,
    StorageAccountSelector, StorageRoute,
};
pub use stager::{QueueStager, StagedMessage, PRODUCT_LIST_BLOB};
