//! Exchange set CLI
//!
//! Operator front end for the `exchangeset` library: stage a queue message
//! for a product list, fulfil a staged message, and inspect the cache and
//! configuration.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use console::style;
use exchangeset::logging::init_logging;

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::fulfil::FulfilArgs;
use commands::stage::StageArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "exchangeset", version, about = "Assemble and publish chart exchange sets")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter, overriding logging.level (RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fulfil a staged queue message and commit the batch
    Fulfil(FulfilArgs),

    /// Write a product list and the queue message that references it
    Stage(StageArgs),

    /// Manage the search-result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = commands::common::load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _log_guard = init_logging(&config.logging).map_err(|e| CliError::Logging(e.to_string()))?;

    match cli.command {
        Commands::Fulfil(args) => commands::fulfil::run(config, args),
        Commands::Stage(args) => commands::stage::run(config, args),
        Commands::Cache { action } => commands::cache::run(&config, action),
        Commands::Config { command } => {
            commands::config::run(cli.config.as_deref(), &config, command)
        }
    }
}
