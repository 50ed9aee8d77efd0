//! Disk cache purge command.

use clap::Args;
use std::path::PathBuf;
use tilestream::cache::{canonical_cache_key, FileCache, FileCacheConfig, PurgeOutcome};

use crate::error::CliError;

/// Arguments for the `purge` command.
#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// URL template identifying the tile source whose cache to purge
    #[arg(short, long)]
    pub template: String,

    /// Cache directory (defaults to the user cache directory)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Size limit in bytes to purge down to
    #[arg(long)]
    pub size_limit: Option<u64>,
}

/// Run the `purge` command.
pub async fn run(args: PurgeArgs) -> Result<(), CliError> {
    let mut config = FileCacheConfig::new(canonical_cache_key(&args.template));
    if let Some(dir) = args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(limit) = args.size_limit {
        config = config.with_size_limit(limit);
    }

    let cache = FileCache::new(config);
    match cache.purge().await.map_err(CliError::Cache)? {
        PurgeOutcome::Purged { removed, freed } => {
            println!("Removed {} tiles, freed {} bytes", removed, freed);
        }
        PurgeOutcome::NotNeeded => {
            println!("Cache is within its size limit, nothing to purge");
        }
        PurgeOutcome::AlreadyRunning => {
            println!("A purge is already in progress");
        }
    }
    Ok(())
}
