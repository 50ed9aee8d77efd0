//! SQLite-backed tile metadata store.
//!
//! Tracks one row per cached blob: freshness tag, access popularity and
//! size on disk. The blob bytes themselves live on the filesystem; this
//! store only answers "what do we know about this tile" and "which tiles
//! are least worth keeping".

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;

use super::types::CacheError;

/// A metadata row, ordered least-popular-first when listed for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMeta {
    pub filename: String,
    pub size: u64,
    pub popularity: i64,
}

/// Tile metadata store.
///
/// The connection is opened in SQLite's serialized threading mode and
/// wrapped in a mutex, so `MetaStore` is `Send + Sync` and callers run
/// statements from blocking tasks without further coordination.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    /// Open (or create) the metadata database at the given path.
    ///
    /// Durability is traded for write throughput: a crash may lose recent
    /// metadata, which at worst re-downloads a tile.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;

        conn.execute_batch(
            "PRAGMA synchronous = OFF;
             PRAGMA auto_vacuum = INCREMENTAL;
             CREATE TABLE IF NOT EXISTS tiles (
                 filename   TEXT PRIMARY KEY,
                 etag       TEXT,
                 popularity INT DEFAULT 1,
                 size       INT DEFAULT 0
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tiles (
                 filename   TEXT PRIMARY KEY,
                 etag       TEXT,
                 popularity INT DEFAULT 1,
                 size       INT DEFAULT 0
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a tile's metadata. Popularity resets to 1, since
    /// a rewrite means the content changed.
    pub fn upsert(
        &self,
        filename: &str,
        etag: Option<&str>,
        size: u64,
    ) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "REPLACE INTO tiles (filename, etag, size) VALUES (?1, ?2, ?3)",
            rusqlite::params![filename, etag, size as i64],
        )?;
        Ok(())
    }

    /// Look up the stored freshness tag for a tile, if the tile is known.
    ///
    /// Returns `Ok(None)` both when the row is missing and when the row
    /// exists without a tag.
    pub fn etag(&self, filename: &str) -> Result<Option<String>, CacheError> {
        let conn = self.conn.lock();
        let etag: Option<Option<String>> = conn
            .query_row(
                "SELECT etag FROM tiles WHERE filename = ?1",
                [filename],
                |row| row.get(0),
            )
            .optional()?;
        Ok(etag.flatten())
    }

    /// Increment a tile's popularity counter. A no-op for unknown tiles.
    pub fn bump_popularity(&self, filename: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tiles SET popularity = popularity + 1 WHERE filename = ?1",
            [filename],
        )?;
        Ok(())
    }

    /// Total recorded size of all cached blobs, in bytes.
    pub fn total_size(&self) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM tiles",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// All rows ordered by ascending popularity, insertion order breaking
    /// ties. The purge walks this list from the front.
    pub fn entries_by_popularity(&self) -> Result<Vec<TileMeta>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT filename, size, popularity FROM tiles
             ORDER BY popularity, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TileMeta {
                filename: row.get(0)?,
                size: row.get::<_, i64>(1)?.max(0) as u64,
                popularity: row.get(2)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Remove a tile's metadata row.
    pub fn delete(&self, filename: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tiles WHERE filename = ?1", [filename])?;
        Ok(())
    }

    /// Subtract `delta` from every surviving row's popularity.
    ///
    /// After a purge removes the least popular tiles, the remaining counts
    /// are rebased by the highest removed popularity so counters stay small
    /// and newly stored tiles (popularity 1) are not immediately evicted
    /// behind long-lived ones.
    pub fn rebase_popularity(&self, delta: i64) -> Result<(), CacheError> {
        if delta <= 0 {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tiles SET popularity = popularity - ?1",
            [delta],
        )?;
        Ok(())
    }

    /// Hand freed pages back to the filesystem.
    pub fn incremental_vacuum(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA incremental_vacuum;")?;
        Ok(())
    }
}
