//! Staging of fulfilment requests for the queue.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use super::message::{FulfilmentMessage, ProductList, EXCHANGE_SET_STANDARD};
use super::selector::{StorageAccountSelector, StorageRoute};
use crate::cache::{BlobStore, StorageError};
use crate::error::{EventId, FulfilmentError, FulfilmentResult};
use crate::model::Product;

/// Blob name of the product list within a batch container.
pub const PRODUCT_LIST_BLOB: &str = "scs-response.json";

/// A message ready to enqueue, and where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMessage {
    pub message: FulfilmentMessage,
    pub route: StorageRoute,
}

/// Writes product lists and builds the messages that reference them.
#[derive(Clone)]
pub struct QueueStager {
    blobs: Arc<dyn BlobStore>,
    selector: StorageAccountSelector,
    aio_cells: HashSet<String>,
}

impl QueueStager {
    pub fn new(blobs: Arc<dyn BlobStore>, selector: StorageAccountSelector) -> Self {
        Self {
            blobs,
            selector,
            aio_cells: HashSet::new(),
        }
    }

    /// Cells counted towards the AIO exchange set rather than the standard one.
    pub fn with_aio_cells(mut self, cells: impl IntoIterator<Item = String>) -> Self {
        self.aio_cells = cells.into_iter().map(|c| c.to_uppercase()).collect();
        self
    }

    /// Write `{batchId}/scs-response.json` and build the message for it.
    pub async fn stage(
        &self,
        batch_id: &str,
        products: &[Product],
        callback_uri: &str,
        correlation_id: &str,
    ) -> FulfilmentResult<StagedMessage> {
        let payload = serde_json::to_vec(&ProductList {
            products: products.to_vec(),
        })
        .map_err(|e| staging_failed(StorageError::from(e)))?;

        self.blobs
            .put(batch_id, PRODUCT_LIST_BLOB, payload)
            .await
            .map_err(staging_failed)?;

        let (aio, standard): (Vec<&Product>, Vec<&Product>) = products
            .iter()
            .partition(|p| self.aio_cells.contains(&p.product_name.to_uppercase()));
        let file_size = products.iter().map(|p| p.file_size).sum();

        let message = FulfilmentMessage {
            batch_id: batch_id.to_string(),
            scs_response_uri: format!("{}/{}", batch_id, PRODUCT_LIST_BLOB),
            callback_uri: callback_uri.to_string(),
            correlation_id: correlation_id.to_string(),
            exchange_set_standard: EXCHANGE_SET_STANDARD.to_string(),
            file_size,
            is_empty_ess: standard.is_empty(),
            is_empty_aio_exchange_set: aio.is_empty(),
        };
        let route = self.selector.route(file_size);

        info!(
            batch_id,
            products = products.len(),
            file_size,
            queue = %route.queue_name(),
            "Staged fulfilment message"
        );

        Ok(StagedMessage { message, route })
    }

    /// Read back the product list a message refers to.
    pub async fn load_products(&self, message: &FulfilmentMessage) -> FulfilmentResult<Vec<Product>> {
        let (container, name) = message.product_list_location().ok_or_else(|| {
            staging_failed(StorageError::Provider(format!(
                "malformed product list uri {:?}",
                message.scs_response_uri
            )))
        })?;

        let bytes = self
            .blobs
            .get(container, name)
            .await
            .map_err(staging_failed)?
            .ok_or_else(|| {
                staging_failed(StorageError::Provider(format!(
                    "product list {} not found",
                    message.scs_response_uri
                )))
            })?;

        let list: ProductList =
            serde_json::from_slice(&bytes).map_err(|e| staging_failed(StorageError::from(e)))?;
        Ok(list.products)
    }
}

fn staging_failed(source: StorageError) -> FulfilmentError {
    FulfilmentError::Storage {
        event: EventId::QueueStagingFailed,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::providers::MemoryBlobStore;
    use crate::queue::{ClassCounters, SizeClass, SizeClassThresholds};

    fn stager() -> (QueueStager, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new(1024 * 1024));
        let selector = StorageAccountSelector::new(
            SizeClassThresholds::default(),
            Arc::new(ClassCounters::new(2, 2, 2)),
        );
        let stager = QueueStager::new(blobs.clone(), selector)
            .with_aio_cells(vec!["gb800001".to_string()]);
        (stager, blobs)
    }

    #[tokio::test]
    async fn test_stage_writes_product_list_and_flags() {
        let (stager, blobs) = stager();
        let products = vec![
            Product::new("DE416080", 9, vec![0, 1]).with_file_size(3000),
            Product::new("GB800001", 2, vec![3]).with_file_size(500),
        ];

        let staged = stager
            .stage("b1", &products, "https://cb", "corr-1")
            .await
            .unwrap();

        assert_eq!(staged.message.scs_response_uri, "b1/scs-response.json");
        assert_eq!(staged.message.file_size, 3500);
        assert!(!staged.message.is_empty_ess);
        assert!(!staged.message.is_empty_aio_exchange_set);
        assert_eq!(staged.route.class, SizeClass::Small);
        assert_eq!(staged.route.instance, 1);
        assert!(blobs.get("b1", PRODUCT_LIST_BLOB).await.unwrap().is_some());

        let loaded = stager.load_products(&staged.message).await.unwrap();
        assert_eq!(loaded, products);
    }

    #[tokio::test]
    async fn test_aio_only_request_has_empty_standard_set() {
        let (stager, _blobs) = stager();
        let products = vec![Product::new("GB800001", 2, vec![3])];
        let staged = stager.stage("b2", &products, "", "c").await.unwrap();
        assert!(staged.message.is_empty_ess);
        assert!(!staged.message.is_empty_aio_exchange_set);
    }

    #[tokio::test]
    async fn test_missing_product_list() {
        let (stager, _blobs) = stager();
        let staged = stager.stage("b3", &[], "", "c").await.unwrap();
        let mut message = staged.message;
        message.scs_response_uri = "other/scs-response.json".to_string();
        let err = stager.load_products(&message).await.unwrap_err();
        assert_eq!(err.event_id(), EventId::QueueStagingFailed);
    }
}
