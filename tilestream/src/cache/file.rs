//! Persistent disk cache for tile blobs.
//!
//! Blobs live on the filesystem under `<cache_dir>/<cache_key>/<z>/<x>/<y>.png`
//! and a SQLite database alongside them tracks freshness tags, popularity
//! and sizes. When disk usage exceeds the configured limit, the least
//! popular tiles are purged first.

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::coord::TileCoord;

use super::meta::MetaStore;
use super::path::{tile_blob_name, tile_blob_path};
use super::types::{CacheError, CachedTile, FileCacheConfig};

/// Name of the metadata database inside the namespace directory.
const META_DB_NAME: &str = "tiles.db";

/// Result of a purge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Another purge was already running; nothing was done.
    AlreadyRunning,
    /// Disk usage was within the limit; nothing was removed.
    NotNeeded,
    /// Tiles were removed.
    Purged {
        /// Number of tiles removed.
        removed: u64,
        /// Bytes freed.
        freed: u64,
    },
}

struct Inner {
    /// `<cache_dir>/<cache_key>`, the root of this tileset's blobs.
    namespace_dir: PathBuf,
    cache_key: String,
    size_limit: AtomicU64,
    purge_slack: u64,
    /// `None` when the metadata store failed to open. The cache then
    /// behaves as a permanent miss rather than failing requests.
    store: Option<Arc<MetaStore>>,
    /// Running estimate of total blob bytes on disk, measured from the
    /// metadata store at open and maintained incrementally. `None` if the
    /// initial measurement failed; the next purge pass re-measures.
    size_estimate: parking_lot::Mutex<Option<u64>>,
    purge_in_progress: AtomicBool,
}

/// Disk-backed tile cache. Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<Inner>,
}

impl FileCache {
    /// Open a disk cache for the given configuration.
    ///
    /// Never fails: if the cache directory or metadata database cannot be
    /// opened, a warning is logged and the cache operates inert, reporting
    /// a miss for every lookup and discarding stores.
    pub fn new(config: FileCacheConfig) -> Self {
        let namespace_dir = config.cache_dir.join(&config.cache_key);

        let (store, initial_estimate) = match Self::open_store(&namespace_dir) {
            Ok(store) => {
                let estimate = store.total_size().ok();
                (Some(Arc::new(store)), estimate)
            }
            Err(e) => {
                warn!(
                    cache_dir = %namespace_dir.display(),
                    error = %e,
                    "Failed to open tile cache, continuing without disk caching"
                );
                (None, None)
            }
        };

        Self {
            inner: Arc::new(Inner {
                namespace_dir,
                cache_key: config.cache_key,
                size_limit: AtomicU64::new(config.size_limit_bytes),
                purge_slack: config.purge_slack_bytes,
                store,
                size_estimate: parking_lot::Mutex::new(initial_estimate),
                purge_in_progress: AtomicBool::new(false),
            }),
        }
    }

    fn open_store(namespace_dir: &std::path::Path) -> Result<MetaStore, CacheError> {
        std::fs::create_dir_all(namespace_dir)?;
        MetaStore::open(&namespace_dir.join(META_DB_NAME))
    }

    /// The namespace this cache stores tiles under.
    pub fn cache_key(&self) -> &str {
        &self.inner.cache_key
    }

    /// Current disk size limit in bytes.
    pub fn size_limit(&self) -> u64 {
        self.inner.size_limit.load(Ordering::Relaxed)
    }

    /// Change the disk size limit. Takes effect on the next purge pass;
    /// lowering the limit does not remove tiles immediately.
    pub fn set_size_limit(&self, bytes: u64) {
        self.inner.size_limit.store(bytes, Ordering::Relaxed);
    }

    /// Look up a tile.
    ///
    /// Returns `Ok(None)` when the blob is absent. A blob without a
    /// metadata row is still a hit, just without a freshness tag. Hits
    /// bump the tile's popularity.
    pub async fn get(&self, coord: &TileCoord) -> Result<Option<CachedTile>, CacheError> {
        let store = match &self.inner.store {
            Some(store) => store,
            None => return Ok(None),
        };

        let path = tile_blob_path(&self.inner.namespace_dir, coord);
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let last_confirmed = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let filename = tile_blob_name(coord);
        let etag = {
            let store = Arc::clone(store);
            tokio::task::spawn_blocking(move || -> Result<Option<String>, CacheError> {
                store.bump_popularity(&filename)?;
                store.etag(&filename)
            })
            .await
            .map_err(|e| CacheError::Task(e.to_string()))??
        };

        debug!(tile = %coord, size = data.len(), "Disk cache hit");
        Ok(Some(CachedTile {
            data,
            etag,
            last_confirmed,
        }))
    }

    /// Write a tile blob and its metadata.
    ///
    /// Resets the tile's popularity, since the content changed. May
    /// schedule a background purge when the size estimate exceeds the
    /// limit by more than the configured slack.
    pub async fn store(
        &self,
        coord: &TileCoord,
        data: Bytes,
        etag: Option<String>,
    ) -> Result<(), CacheError> {
        let store = match &self.inner.store {
            Some(store) => store,
            None => return Ok(()),
        };

        let path = tile_blob_path(&self.inner.namespace_dir, coord);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;

        let size = data.len() as u64;
        let filename = tile_blob_name(coord);
        {
            let store = Arc::clone(store);
            tokio::task::spawn_blocking(move || store.upsert(&filename, etag.as_deref(), size))
                .await
                .map_err(|e| CacheError::Task(e.to_string()))??;
        }

        debug!(tile = %coord, size, "Stored tile on disk");
        self.account_store(size);
        Ok(())
    }

    /// Refresh a tile's last-confirmed time to now, without rewriting the
    /// blob. Called after the origin confirms the cached copy is current.
    pub async fn mark_up_to_date(&self, coord: &TileCoord) -> Result<(), CacheError> {
        if self.inner.store.is_none() {
            return Ok(());
        }

        let path = tile_blob_path(&self.inner.namespace_dir, coord);
        tokio::task::spawn_blocking(move || -> Result<(), CacheError> {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(SystemTime::now())?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// Remove least-popular tiles until disk usage is back under the
    /// limit.
    ///
    /// At most one purge runs at a time; a call overlapping a running
    /// purge returns [`PurgeOutcome::AlreadyRunning`] without waiting.
    pub async fn purge(&self) -> Result<PurgeOutcome, CacheError> {
        if self.inner.store.is_none() {
            return Ok(PurgeOutcome::NotNeeded);
        }

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || purge_blocking(&inner))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// Schedule a purge on the runtime without waiting for it. Failures
    /// are logged.
    pub fn purge_on_idle(&self) {
        let cache = self.clone();
        tokio::spawn(async move {
            match cache.purge().await {
                Ok(PurgeOutcome::Purged { removed, freed }) => {
                    info!(removed, freed, "Background cache purge completed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Background cache purge failed"),
            }
        });
    }

    /// Update the size estimate after a store and decide whether a purge
    /// is due.
    fn account_store(&self, added: u64) {
        let needs_purge = {
            let mut estimate = self.inner.size_estimate.lock();
            match estimate.as_mut() {
                Some(total) => {
                    *total += added;
                    let limit = self.inner.size_limit.load(Ordering::Relaxed);
                    *total > limit.saturating_add(self.inner.purge_slack)
                }
                // Usage unknown until a purge pass measures it.
                None => true,
            }
        };
        if needs_purge {
            self.purge_on_idle();
        }
    }
}

/// Guard resetting the purge-in-progress flag when the pass exits.
struct PurgeFlagGuard<'a>(&'a AtomicBool);

impl Drop for PurgeFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn purge_blocking(inner: &Inner) -> Result<PurgeOutcome, CacheError> {
    let store = match &inner.store {
        Some(store) => store,
        None => return Ok(PurgeOutcome::NotNeeded),
    };

    if inner
        .purge_in_progress
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Ok(PurgeOutcome::AlreadyRunning);
    }
    let _guard = PurgeFlagGuard(&inner.purge_in_progress);

    let limit = inner.size_limit.load(Ordering::Relaxed);
    let total = store.total_size()?;
    if total <= limit {
        *inner.size_estimate.lock() = Some(total);
        return Ok(PurgeOutcome::NotNeeded);
    }

    let excess = total - limit;
    let entries = store.entries_by_popularity()?;

    let mut freed: u64 = 0;
    let mut removed: u64 = 0;
    let mut highest_removed_popularity: i64 = 0;

    for entry in entries {
        if freed >= excess {
            break;
        }
        let path = inner.namespace_dir.join(&entry.filename);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            // Row without a blob still counts as freed metadata.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to remove cached tile");
                continue;
            }
        }
        store.delete(&entry.filename)?;
        freed += entry.size;
        removed += 1;
        highest_removed_popularity = entry.popularity;
    }

    // Rebase survivors so popularity counters stay small and fresh tiles
    // are not immediately behind long-lived ones.
    store.rebase_popularity(highest_removed_popularity)?;
    store.incremental_vacuum()?;

    *inner.size_estimate.lock() = Some(total.saturating_sub(freed));

    info!(removed, freed, total_before = total, limit, "Purged tile cache");
    Ok(PurgeOutcome::Purged { removed, freed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache(dir: &TempDir, limit: u64) -> FileCache {
        // Huge slack keeps background purges from racing the assertions;
        // the tests call purge() explicitly.
        let config = FileCacheConfig::new("test_tiles")
            .with_cache_dir(dir.path().to_path_buf())
            .with_size_limit(limit)
            .with_purge_slack(u64::MAX);
        FileCache::new(config)
    }

    // ========================================================================
    // Store and retrieve
    // ========================================================================

    #[tokio::test]
    async fn test_store_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);
        let coord = TileCoord::new(3, 5, 7);

        cache
            .store(&coord, Bytes::from_static(b"tile bytes"), Some("\"v1\"".into()))
            .await
            .unwrap();

        let hit = cache.get(&coord).await.unwrap().unwrap();
        assert_eq!(hit.data, Bytes::from_static(b"tile bytes"));
        assert_eq!(hit.etag.as_deref(), Some("\"v1\""));
        assert!(hit.last_confirmed.is_some());
    }

    #[tokio::test]
    async fn test_get_miss() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);

        let result = cache.get(&TileCoord::new(1, 1, 1)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_store_without_etag() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);
        let coord = TileCoord::new(0, 0, 0);

        cache
            .store(&coord, Bytes::from_static(b"data"), None)
            .await
            .unwrap();

        let hit = cache.get(&coord).await.unwrap().unwrap();
        assert_eq!(hit.etag, None);
    }

    #[tokio::test]
    async fn test_blob_without_metadata_row_is_a_hit() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);
        let coord = TileCoord::new(4, 2, 6);

        // Write the blob directly, bypassing the metadata store.
        let path = tile_blob_path(&dir.path().join("test_tiles"), &coord);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"orphan blob").unwrap();

        let hit = cache.get(&coord).await.unwrap().unwrap();
        assert_eq!(hit.data, Bytes::from_static(b"orphan blob"));
        assert_eq!(hit.etag, None);
    }

    // ========================================================================
    // Freshness
    // ========================================================================

    #[tokio::test]
    async fn test_mark_up_to_date_advances_modification_time() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);
        let coord = TileCoord::new(1, 2, 3);

        cache
            .store(&coord, Bytes::from_static(b"data"), None)
            .await
            .unwrap();

        // Age the blob by a day.
        let path = tile_blob_path(&dir.path().join("test_tiles"), &coord);
        let old = SystemTime::now() - std::time::Duration::from_secs(86_400);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();

        let aged = cache.get(&coord).await.unwrap().unwrap();
        cache.mark_up_to_date(&coord).await.unwrap();
        let refreshed = cache.get(&coord).await.unwrap().unwrap();

        assert!(refreshed.last_confirmed.unwrap() > aged.last_confirmed.unwrap());
    }

    // ========================================================================
    // Purging
    // ========================================================================

    #[tokio::test]
    async fn test_purge_not_needed_under_limit() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);

        cache
            .store(&TileCoord::new(0, 0, 0), Bytes::from_static(b"small"), None)
            .await
            .unwrap();

        assert_eq!(cache.purge().await.unwrap(), PurgeOutcome::NotNeeded);
        assert!(cache.get(&TileCoord::new(0, 0, 0)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_least_popular_first() {
        let dir = TempDir::new().unwrap();
        // 3 tiles of 100 bytes, limit 150: purge must free at least 150.
        let cache = test_cache(&dir, 150);

        let a = TileCoord::new(1, 0, 5);
        let b = TileCoord::new(2, 0, 5);
        let c = TileCoord::new(3, 0, 5);
        let blob = Bytes::from(vec![0u8; 100]);
        cache.store(&a, blob.clone(), None).await.unwrap();
        cache.store(&b, blob.clone(), None).await.unwrap();
        cache.store(&c, blob.clone(), None).await.unwrap();

        // Reads make c the most popular tile.
        cache.get(&c).await.unwrap();
        cache.get(&c).await.unwrap();

        let outcome = cache.purge().await.unwrap();
        assert_eq!(
            outcome,
            PurgeOutcome::Purged {
                removed: 2,
                freed: 200
            }
        );

        assert!(cache.get(&a).await.unwrap().is_none());
        assert!(cache.get(&b).await.unwrap().is_none());
        assert!(cache.get(&c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_respects_lowered_limit() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 1_000_000);

        let coord = TileCoord::new(0, 0, 1);
        cache
            .store(&coord, Bytes::from(vec![0u8; 500]), None)
            .await
            .unwrap();
        assert_eq!(cache.purge().await.unwrap(), PurgeOutcome::NotNeeded);

        cache.set_size_limit(100);
        match cache.purge().await.unwrap() {
            PurgeOutcome::Purged { removed, freed } => {
                assert_eq!(removed, 1);
                assert_eq!(freed, 500);
            }
            other => panic!("expected purge, got {other:?}"),
        }
        assert!(cache.get(&coord).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_skipped_while_one_is_running() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir, 100);

        cache
            .store(&TileCoord::new(0, 0, 1), Bytes::from(vec![0u8; 300]), None)
            .await
            .unwrap();

        // Simulate an in-flight purge holding the flag.
        cache
            .inner
            .purge_in_progress
            .store(true, Ordering::Release);
        assert_eq!(cache.purge().await.unwrap(), PurgeOutcome::AlreadyRunning);

        // Once the flag clears, purging proceeds.
        cache
            .inner
            .purge_in_progress
            .store(false, Ordering::Release);
        assert!(matches!(
            cache.purge().await.unwrap(),
            PurgeOutcome::Purged { .. }
        ));
    }

    // ========================================================================
    // Inert fallback
    // ========================================================================

    #[tokio::test]
    async fn test_unopenable_cache_is_inert() {
        let dir = TempDir::new().unwrap();
        // A regular file where the cache directory should be makes
        // create_dir_all fail.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = FileCacheConfig::new("ns").with_cache_dir(blocker);
        let cache = FileCache::new(config);
        let coord = TileCoord::new(1, 1, 1);

        cache
            .store(&coord, Bytes::from_static(b"data"), None)
            .await
            .unwrap();
        assert!(cache.get(&coord).await.unwrap().is_none());
        assert_eq!(cache.purge().await.unwrap(), PurgeOutcome::NotNeeded);
        cache.mark_up_to_date(&coord).await.unwrap();
    }
}
