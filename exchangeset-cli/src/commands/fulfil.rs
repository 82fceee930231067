//! Fulfil command: run the pipeline for one queue message.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use console::style;
use exchangeset::cache::providers::DiskBlobStore;
use exchangeset::config::FulfilmentConfig;
use exchangeset::fulfilment::{cache_store_from_config, FulfilmentClients};
use exchangeset::queue::{FulfilmentMessage, QueueStager, StorageAccountSelector};
use exchangeset::{FulfilmentOutcome, FulfilmentRequest, FulfilmentService};
use tracing::info;

use super::common::{file_share_client, runtime, LayoutArg};
use crate::error::CliError;

/// Arguments for `exchangeset fulfil`.
#[derive(Debug, Args)]
pub struct FulfilArgs {
    /// Queue message JSON written by `exchangeset stage`
    #[arg(long)]
    pub message: PathBuf,

    /// Staging layout (overrides exchange_set.layout)
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// Work directory for staging trees (overrides exchange_set.work_directory)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Keep the staging tree after a successful commit
    #[arg(long)]
    pub keep_staging: bool,

    /// Skip the search-result cache for this run
    #[arg(long)]
    pub no_cache: bool,
}

/// Run the fulfil command.
pub fn run(config: FulfilmentConfig, args: FulfilArgs) -> Result<(), CliError> {
    let message = read_message(&args.message)?;
    let runtime = runtime()?;
    let outcome = runtime.block_on(fulfil(&config, &args, &message))?;
    print_outcome(&outcome);
    Ok(())
}

fn read_message(path: &Path) -> Result<FulfilmentMessage, CliError> {
    let contents = std::fs::read(path).map_err(|e| CliError::io(path, e))?;
    serde_json::from_slice(&contents).map_err(|e| CliError::json(path, e))
}

async fn fulfil(
    config: &FulfilmentConfig,
    args: &FulfilArgs,
    message: &FulfilmentMessage,
) -> Result<FulfilmentOutcome, CliError> {
    let stager = QueueStager::new(
        Arc::new(DiskBlobStore::new(&config.queue.staging_directory)),
        StorageAccountSelector::from_config(&config.queue),
    );
    let products = stager.load_products(message).await?;

    info!(
        batch_id = %message.batch_id,
        correlation_id = %message.correlation_id,
        products = products.len(),
        "Loaded fulfilment message"
    );

    let clients = FulfilmentClients::from_http(file_share_client(config)?);
    let cache = if args.no_cache {
        None
    } else {
        cache_store_from_config(&config.cache)
    };
    let service = FulfilmentService::from_config(config, clients, cache)
        .with_keep_staging(config.exchange_set.keep_staging || args.keep_staging);

    let request = FulfilmentRequest {
        batch_id: message.batch_id.clone(),
        business_unit: config.search.business_unit.clone(),
        products,
        layout: args
            .layout
            .map(Into::into)
            .unwrap_or(config.exchange_set.layout),
        work_directory: args
            .work_dir
            .clone()
            .unwrap_or_else(|| config.exchange_set.work_directory.clone()),
    };

    Ok(service.fulfil(&request).await?)
}

fn print_outcome(outcome: &FulfilmentOutcome) {
    println!(
        "{} batch {}",
        style("Committed").green().bold(),
        style(&outcome.batch_id).cyan()
    );
    println!(
        "  Files:    {} ({} from cache, {} from {} searches)",
        outcome.file_count(),
        outcome.cache_hits(),
        outcome.remote_matches(),
        outcome.searches()
    );
    for archive in &outcome.archives {
        println!(
            "  Archive:  {} ({} bytes, {} blocks, md5 {})",
            archive.file_name, archive.size, archive.blocks, archive.hash
        );
    }
    println!(
        "  Commit:   {} polls in {:.1?}",
        outcome.commit.polls, outcome.commit.elapsed
    );
}
