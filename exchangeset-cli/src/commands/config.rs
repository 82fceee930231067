//! Configuration CLI commands.
//!
//! Provides `config show` and `config path` for inspecting the configuration
//! a command would run with.

use std::path::Path;

use clap::Subcommand;
use exchangeset::config::{ConfigFile, FulfilmentConfig};

use super::common::config_path;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as INI (access token masked)
    Show,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(
    explicit: Option<&Path>,
    config: &FulfilmentConfig,
    command: ConfigCommands,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => run_show(config),
        ConfigCommands::Path => run_path(explicit),
    }
}

fn run_show(config: &FulfilmentConfig) -> Result<(), CliError> {
    print!("{}", ConfigFile::render(config));
    Ok(())
}

fn run_path(explicit: Option<&Path>) -> Result<(), CliError> {
    let path = config_path(explicit).ok_or_else(|| {
        CliError::Config("Could not determine a configuration directory".to_string())
    })?;

    println!("{}", path.display());
    if !path.exists() {
        println!("(file does not exist, built-in defaults apply)");
    }
    Ok(())
}
