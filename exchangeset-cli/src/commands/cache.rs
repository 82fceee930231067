//! Cache management CLI commands.

use clap::Subcommand;
use exchangeset::cache::providers::{clear_disk_cache, disk_cache_stats};
use exchangeset::config::{CacheProvider, FulfilmentConfig};

use super::common::format_size;
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing cached search results and files
    Clear,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(config: &FulfilmentConfig, action: CacheAction) -> Result<(), CliError> {
    let cache_dir = &config.cache.directory;

    if config.cache.provider == CacheProvider::Memory {
        println!(
            "Cache provider is '{}'; nothing is kept between runs.",
            config.cache.provider.as_str()
        );
    }

    match action {
        CacheAction::Clear => {
            let before =
                disk_cache_stats(cache_dir).map_err(|e| CliError::CacheClear(e.to_string()))?;
            let result =
                clear_disk_cache(cache_dir).map_err(|e| CliError::CacheClear(e.to_string()))?;

            println!(
                "Cleared {}: {} search results, {} batch files, freed {}",
                cache_dir.display(),
                before.table_rows,
                before.blob_files,
                format_size(result.bytes_freed)
            );
            Ok(())
        }
        CacheAction::Stats => {
            let stats =
                disk_cache_stats(cache_dir).map_err(|e| CliError::CacheStats(e.to_string()))?;

            println!("Disk cache: {}", cache_dir.display());
            println!(
                "  Search results: {} rows ({})",
                stats.table_rows,
                format_size(stats.table_bytes)
            );
            println!(
                "  Batch files:    {} blobs in {} containers ({})",
                stats.blob_files,
                stats.containers,
                format_size(stats.blob_bytes)
            );
            println!(
                "  Spill threshold: {}",
                format_size(config.cache.spill_threshold_bytes as u64)
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchangeset::config::CacheConfig;

    #[test]
    fn test_stats_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("blobs/b1/DE416080.000");
        std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
        std::fs::write(&blob, b"cell").unwrap();

        let config = FulfilmentConfig::default()
            .with_cache(CacheConfig::default().with_directory(dir.path()));

        run(&config, CacheAction::Stats).unwrap();
        run(&config, CacheAction::Clear).unwrap();
        assert!(!blob.exists());
    }

    #[test]
    fn test_missing_cache_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = FulfilmentConfig::default()
            .with_cache(CacheConfig::default().with_directory(dir.path().join("absent")));
        run(&config, CacheAction::Stats).unwrap();
    }
}
