//! Wire format of the fulfilment queue message.

use serde::{Deserialize, Serialize};

use crate::model::Product;

/// Exchange set standard carried in every message.
pub const EXCHANGE_SET_STANDARD: &str = "s63";

/// Message that hands a staged request to a fulfilment worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfilmentMessage {
    pub batch_id: String,
    /// Blob holding the [`ProductList`] for this batch.
    pub scs_response_uri: String,
    pub callback_uri: String,
    pub correlation_id: String,
    pub exchange_set_standard: String,
    /// Sum of the requested products' catalogue sizes in bytes.
    pub file_size: u64,
    pub is_empty_ess: bool,
    pub is_empty_aio_exchange_set: bool,
}

impl FulfilmentMessage {
    /// Blob container and name of the product list.
    ///
    /// The URI has the form `{container}/{name}`.
    pub fn product_list_location(&self) -> Option<(&str, &str)> {
        self.scs_response_uri
            .split_once('/')
            .filter(|(container, name)| !container.is_empty() && !name.is_empty())
    }
}

/// Product list a message refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductList {
    pub products: Vec<Product>,
}
