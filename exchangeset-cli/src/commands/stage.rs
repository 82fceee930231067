//! Stage command: write a product list and the queue message that points at it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use console::style;
use exchangeset::cache::providers::DiskBlobStore;
use exchangeset::config::FulfilmentConfig;
use exchangeset::fulfilment::FulfilmentClients;
use exchangeset::queue::{ProductList, QueueStager, StagedMessage, StorageAccountSelector};
use exchangeset::{FulfilmentService, Product};

use super::common::{file_share_client, runtime};
use crate::error::CliError;

/// Directory under the staging directory that holds queue messages.
const MESSAGE_DIR: &str = "messages";

/// Arguments for `exchangeset stage`.
#[derive(Debug, Args)]
pub struct StageArgs {
    /// Product list JSON: `{"products": [...]}` or a bare array
    #[arg(long)]
    pub products: PathBuf,

    /// URI notified when fulfilment finishes
    #[arg(long)]
    pub callback_uri: String,

    /// Existing batch id (a new batch is created when omitted)
    #[arg(long)]
    pub batch_id: Option<String>,

    /// Correlation id carried in the message (defaults to the batch id)
    #[arg(long)]
    pub correlation_id: Option<String>,

    /// Where to write the message (defaults to the staging directory)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

/// Run the stage command.
pub fn run(config: FulfilmentConfig, args: StageArgs) -> Result<(), CliError> {
    let products = read_products(&args.products)?;
    let runtime = runtime()?;
    let staged = runtime.block_on(stage(&config, &args, &products))?;

    let output = args.output.clone().unwrap_or_else(|| {
        message_path(&config.queue.staging_directory, &staged)
    });
    write_message(&output, &staged)?;

    println!(
        "{} batch {} for queue {}",
        style("Staged").green().bold(),
        style(&staged.message.batch_id).cyan(),
        staged.route.queue_name()
    );
    println!("  Products: {}", products.len());
    println!("  Size:     {} bytes", staged.message.file_size);
    println!("  Message:  {}", output.display());
    Ok(())
}

/// Parse a product list in either accepted shape.
fn parse_products(contents: &[u8]) -> Result<Vec<Product>, serde_json::Error> {
    serde_json::from_slice::<ProductList>(contents)
        .map(|list| list.products)
        .or_else(|_| serde_json::from_slice::<Vec<Product>>(contents))
}

fn read_products(path: &Path) -> Result<Vec<Product>, CliError> {
    let contents = std::fs::read(path).map_err(|e| CliError::io(path, e))?;
    parse_products(&contents).map_err(|e| CliError::json(path, e))
}

async fn stage(
    config: &FulfilmentConfig,
    args: &StageArgs,
    products: &[Product],
) -> Result<StagedMessage, CliError> {
    let batch_id = match &args.batch_id {
        Some(id) => id.clone(),
        None => {
            let clients = FulfilmentClients::from_http(file_share_client(config)?);
            FulfilmentService::from_config(config, clients, None)
                .create_batch(&config.search.business_unit)
                .await?
        }
    };
    let correlation_id = args.correlation_id.clone().unwrap_or_else(|| batch_id.clone());

    let stager = QueueStager::new(
        Arc::new(DiskBlobStore::new(&config.queue.staging_directory)),
        StorageAccountSelector::from_config(&config.queue),
    )
    .with_aio_cells(config.exchange_set.aio_cells.iter().cloned());

    Ok(stager
        .stage(&batch_id, products, &args.callback_uri, &correlation_id)
        .await?)
}

/// `{staging}/messages/{queue}/{batch_id}.json`
fn message_path(staging_directory: &Path, staged: &StagedMessage) -> PathBuf {
    staging_directory
        .join(MESSAGE_DIR)
        .join(staged.route.queue_name())
        .join(format!("{}.json", staged.message.batch_id))
}

fn write_message(path: &Path, staged: &StagedMessage) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CliError::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(&staged.message).map_err(|e| CliError::json(path, e))?;
    std::fs::write(path, json).map_err(|e| CliError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_and_bare_lists() {
        let wrapped = br#"{"products":[{"productName":"GB123456","editionNumber":3,"updateNumbers":[0,1]}]}"#;
        let bare = br#"[{"productName":"GB123456","editionNumber":3,"updateNumbers":[0,1]}]"#;

        let a = parse_products(wrapped).unwrap();
        let b = parse_products(bare).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].product_name, "GB123456");
    }

    #[test]
    fn test_parse_rejects_other_json() {
        assert!(parse_products(br#"{"cells": []}"#).is_err());
    }
}
