//! In-memory LRU cache for rendered tile payloads.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::coord::TileCoord;

/// Key for the in-memory cache.
///
/// Includes the source identifier so tiles from different sources sharing
/// one cache never alias, even at identical coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub source_id: String,
}

impl MemoryKey {
    /// Build a key from a tile coordinate and a source identifier.
    pub fn new(coord: &TileCoord, source_id: impl Into<String>) -> Self {
        Self {
            zoom: coord.zoom,
            x: coord.x,
            y: coord.y,
            source_id: source_id.into(),
        }
    }
}

/// Bounded in-memory cache holding the most recently used tile payloads.
///
/// Capacity counts entries, not bytes. The payload type is generic so the
/// cache can hold raw bytes or decoded textures; it must be cheap to clone
/// (an `Arc` or `Bytes`).
pub struct MemoryCache<P: Clone + Send> {
    entries: Mutex<LruCache<MemoryKey, P>>,
}

impl<P: Clone + Send> MemoryCache<P> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("Capacity must be > 0");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a payload, marking it most recently used on a hit.
    pub fn try_fill(&self, key: &MemoryKey) -> Option<P> {
        self.entries.lock().get(key).cloned()
    }

    /// Store a payload under a key.
    ///
    /// If the key is already present, the entry is only refreshed in the
    /// recency order; the stored payload is kept. Inserting into a full
    /// cache evicts the least recently used entry.
    pub fn store(&self, key: MemoryKey, payload: P) {
        let mut entries = self.entries.lock();
        if entries.contains(&key) {
            entries.promote(&key);
        } else {
            entries.push(key, payload);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn key(x: u32, y: u32, zoom: u8) -> MemoryKey {
        MemoryKey::new(&TileCoord::new(x, y, zoom), "test-source")
    }

    #[test]
    fn test_store_and_fill() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(4);
        cache.store(key(1, 2, 3), Bytes::from_static(b"tile"));

        assert_eq!(
            cache.try_fill(&key(1, 2, 3)),
            Some(Bytes::from_static(b"tile"))
        );
    }

    #[test]
    fn test_miss_returns_none() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(4);
        assert_eq!(cache.try_fill(&key(9, 9, 9)), None);
    }

    #[test]
    fn test_source_id_separates_tiles() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(4);
        let coord = TileCoord::new(1, 1, 1);
        cache.store(
            MemoryKey::new(&coord, "source-a"),
            Bytes::from_static(b"a"),
        );

        assert_eq!(cache.try_fill(&MemoryKey::new(&coord, "source-b")), None);
        assert_eq!(
            cache.try_fill(&MemoryKey::new(&coord, "source-a")),
            Some(Bytes::from_static(b"a"))
        );
    }

    #[test]
    fn test_eviction_drops_least_recently_used() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(2);
        cache.store(key(1, 0, 0), Bytes::from_static(b"1"));
        cache.store(key(2, 0, 0), Bytes::from_static(b"2"));

        // Touch the first entry so the second becomes LRU.
        assert!(cache.try_fill(&key(1, 0, 0)).is_some());

        cache.store(key(3, 0, 0), Bytes::from_static(b"3"));

        assert!(cache.try_fill(&key(1, 0, 0)).is_some());
        assert!(cache.try_fill(&key(2, 0, 0)).is_none());
        assert!(cache.try_fill(&key(3, 0, 0)).is_some());
    }

    #[test]
    fn test_store_existing_key_refreshes_recency() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(2);
        cache.store(key(1, 0, 0), Bytes::from_static(b"1"));
        cache.store(key(2, 0, 0), Bytes::from_static(b"2"));

        // Re-storing key 1 promotes it; key 2 becomes the eviction victim.
        cache.store(key(1, 0, 0), Bytes::from_static(b"ignored"));
        cache.store(key(3, 0, 0), Bytes::from_static(b"3"));

        assert_eq!(
            cache.try_fill(&key(1, 0, 0)),
            Some(Bytes::from_static(b"1"))
        );
        assert!(cache.try_fill(&key(2, 0, 0)).is_none());
    }

    #[test]
    fn test_clear() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(4);
        cache.store(key(1, 0, 0), Bytes::from_static(b"1"));
        cache.store(key(2, 0, 0), Bytes::from_static(b"2"));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.try_fill(&key(1, 0, 0)).is_none());
    }

    #[test]
    #[should_panic(expected = "Capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _cache: MemoryCache<Bytes> = MemoryCache::new(0);
    }

    #[test]
    fn test_capacity() {
        let cache: MemoryCache<Bytes> = MemoryCache::new(64);
        assert_eq!(cache.capacity(), 64);
    }
}
