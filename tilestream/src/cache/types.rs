//! Core types for the cache system.

use bytes::Bytes;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

/// Default disk cache size limit (100 MB), matching typical raster tile
/// workloads.
pub const DEFAULT_SIZE_LIMIT_BYTES: u64 = 100_000_000;

/// Default slack before a store triggers a background purge (5 MB).
///
/// The size estimate must exceed the limit by more than this margin for a
/// purge to be scheduled, so every store does not re-scan the whole store.
pub const DEFAULT_PURGE_SLACK_BYTES: u64 = 5_000_000;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata store (SQLite) error
    #[error("cache metadata store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A background cache task failed to run to completion
    #[error("cache task failed: {0}")]
    Task(String),
}

/// A tile read back from the disk cache.
#[derive(Debug, Clone)]
pub struct CachedTile {
    /// Raw tile bytes. The pipeline never inspects these.
    pub data: Bytes,
    /// Freshness tag (HTTP ETag) stored with the tile, if any.
    pub etag: Option<String>,
    /// When the tile was last confirmed fresh (the blob's modification
    /// time). `None` if the filesystem could not report it.
    pub last_confirmed: Option<SystemTime>,
}

/// Disk cache configuration.
///
/// `cache_dir` and `cache_key` are fixed at construction; the size limit
/// may be changed at runtime via [`FileCache::set_size_limit`] and takes
/// effect on the next purge.
///
/// [`FileCache::set_size_limit`]: crate::cache::FileCache::set_size_limit
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Cache directory root. Tiles are stored under
    /// `<cache_dir>/<cache_key>/`.
    pub cache_dir: PathBuf,
    /// Namespace for this tileset within the cache directory.
    pub cache_key: String,
    /// Maximum disk usage in bytes.
    pub size_limit_bytes: u64,
    /// How far the size estimate may exceed the limit before a store
    /// schedules a background purge.
    pub purge_slack_bytes: u64,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tilestream");

        Self {
            cache_dir,
            cache_key: String::from("default"),
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            purge_slack_bytes: DEFAULT_PURGE_SLACK_BYTES,
        }
    }
}

impl FileCacheConfig {
    /// Create a configuration for the given tileset namespace.
    pub fn new(cache_key: impl Into<String>) -> Self {
        Self {
            cache_key: cache_key.into(),
            ..Self::default()
        }
    }

    /// Set the cache directory root.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = dir;
        self
    }

    /// Set the disk size limit in bytes.
    pub fn with_size_limit(mut self, bytes: u64) -> Self {
        self.size_limit_bytes = bytes;
        self
    }

    /// Set the purge slack margin in bytes.
    pub fn with_purge_slack(mut self, bytes: u64) -> Self {
        self.purge_slack_bytes = bytes;
        self
    }
}
