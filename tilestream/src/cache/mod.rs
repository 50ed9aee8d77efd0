//! Two-tier cache for raw tile bytes.
//!
//! Provides an in-memory LRU cache for instant re-access and a persistent,
//! size-bounded disk cache with popularity-based eviction and HTTP freshness
//! metadata.

mod file;
mod memory;
mod meta;
mod path;
mod types;

pub use file::{FileCache, PurgeOutcome};
pub use memory::{MemoryCache, MemoryKey};
pub use types::{CacheError, CachedTile, FileCacheConfig};

// Re-export path utilities for convenience
pub use path::{canonical_cache_key, tile_blob_name, tile_blob_path};
