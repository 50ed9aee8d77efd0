//! HTTP tile downloader with a disk cache in front.
//!
//! The download pipeline for each tile:
//!
//! 1. Look in the disk cache. A fresh hit completes the request without
//!    touching the network. A stale hit is emitted immediately so the
//!    caller has something to show, then revalidated.
//! 2. GET the tile URL, conditional on the cached entity tag or
//!    modification time when one exists.
//! 3. 304 confirms the cached tile; a new body replaces it and is written
//!    back to the cache in the background. Network failures fall back to
//!    the stale tile when one was emitted.

use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{canonical_cache_key, CachedTile, FileCache, FileCacheConfig};
use crate::coord::{TileCoord, MAX_ZOOM, MIN_ZOOM};

use super::http::{Conditional, FetchError, HttpTileFetcher, TileFetch};
use super::request::TileRequest;
use super::{DataSource, DataSourceError};

/// How long a cached tile is served without consulting the origin.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Downloader configuration.
///
/// The cache namespace defaults to a canonicalized form of the URL
/// template, so two downloaders with different templates never share
/// blobs even when pointed at the same cache directory.
#[derive(Debug, Clone)]
pub struct TileDownloaderConfig {
    /// URL template with `{x}`, `{y}`, `{z}` and `{tmsy}` placeholders.
    pub url_template: String,
    /// Age beyond which a cached tile is revalidated with the origin.
    pub stale_after: Duration,
    /// Disk cache configuration.
    pub cache: FileCacheConfig,
}

impl TileDownloaderConfig {
    /// Configuration for a URL template, with default cache settings.
    pub fn new(url_template: impl Into<String>) -> Self {
        let url_template = url_template.into();
        let cache = FileCacheConfig::new(canonical_cache_key(&url_template));
        Self {
            url_template,
            stale_after: DEFAULT_STALE_AFTER,
            cache,
        }
    }

    /// Set the staleness window.
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = window;
        self
    }

    /// Set the cache directory root.
    pub fn with_cache_dir(mut self, dir: std::path::PathBuf) -> Self {
        self.cache.cache_dir = dir;
        self
    }

    /// Set the disk cache size limit in bytes.
    pub fn with_size_limit(mut self, bytes: u64) -> Self {
        self.cache.size_limit_bytes = bytes;
        self
    }
}

struct Inner<F> {
    url_template: String,
    stale_after: Duration,
    cache: FileCache,
    fetcher: F,
    min_zoom: AtomicU8,
    max_zoom: AtomicU8,
}

/// Tile source that fetches from an HTTP origin through a disk cache.
pub struct TileDownloader<F: TileFetch = HttpTileFetcher> {
    inner: Arc<Inner<F>>,
}

impl<F: TileFetch> Clone for TileDownloader<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TileDownloader {
    /// Create a downloader with the real HTTP fetcher.
    pub fn new(config: TileDownloaderConfig) -> Result<Self, FetchError> {
        Ok(Self::with_fetcher(config, HttpTileFetcher::new()?))
    }
}

impl<F: TileFetch> TileDownloader<F> {
    /// Create a downloader with a custom fetcher. Used by tests to
    /// script origin responses.
    pub fn with_fetcher(config: TileDownloaderConfig, fetcher: F) -> Self {
        Self {
            inner: Arc::new(Inner {
                url_template: config.url_template,
                stale_after: config.stale_after,
                cache: FileCache::new(config.cache),
                fetcher,
                min_zoom: AtomicU8::new(MIN_ZOOM),
                max_zoom: AtomicU8::new(MAX_ZOOM),
            }),
        }
    }

    /// The URL template tiles are fetched from.
    pub fn url_template(&self) -> &str {
        &self.inner.url_template
    }

    /// The disk cache backing this downloader.
    pub fn cache(&self) -> &FileCache {
        &self.inner.cache
    }

    /// Advisory lowest zoom level the origin serves. Not enforced.
    pub fn min_zoom(&self) -> u8 {
        self.inner.min_zoom.load(Ordering::Relaxed)
    }

    /// Set the advisory lowest zoom level.
    pub fn set_min_zoom(&self, zoom: u8) {
        self.inner.min_zoom.store(zoom, Ordering::Relaxed);
    }

    /// Advisory highest zoom level the origin serves. Not enforced.
    pub fn max_zoom(&self) -> u8 {
        self.inner.max_zoom.load(Ordering::Relaxed)
    }

    /// Set the advisory highest zoom level.
    pub fn set_max_zoom(&self, zoom: u8) {
        self.inner.max_zoom.store(zoom, Ordering::Relaxed);
    }
}

impl<F: TileFetch + 'static> DataSource for TileDownloader<F> {
    fn start_request(
        &self,
        coord: TileCoord,
        cancellation: CancellationToken,
    ) -> Arc<TileRequest> {
        let request = Arc::new(TileRequest::new(coord));
        let inner = Arc::clone(&self.inner);
        let task_request = Arc::clone(&request);
        tokio::spawn(async move {
            run(inner, task_request, cancellation).await;
        });
        request
    }
}

/// Substitute `{x}`, `{y}`, `{z}` and `{tmsy}` placeholders.
fn build_url(template: &str, coord: &TileCoord) -> String {
    template
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
        .replace("{z}", &coord.zoom.to_string())
        .replace("{tmsy}", &coord.tms_y().to_string())
}

/// True if the cached tile is recent enough to serve without
/// revalidation.
fn is_fresh(tile: &CachedTile, stale_after: Duration) -> bool {
    tile.last_confirmed
        .and_then(|t| t.elapsed().ok())
        .map(|age| age < stale_after)
        .unwrap_or(false)
}

/// Validator for a conditional request, preferring the entity tag.
fn conditional_for(tile: &CachedTile) -> Option<Conditional> {
    tile.etag
        .clone()
        .map(Conditional::Etag)
        .or_else(|| tile.last_confirmed.map(Conditional::ModifiedSince))
}

/// Finish a cancelled request: a stale tile already emitted still counts
/// as a result.
fn finish_cancelled(request: &TileRequest) {
    if request.data().is_some() {
        request.complete();
    } else {
        request.emit_error(DataSourceError::Cancelled);
    }
}

/// Finish a failed revalidation: fall back to the emitted stale tile
/// when there is one, otherwise fail the request.
fn finish_with_fallback(request: &TileRequest, error: DataSourceError) {
    if request.data().is_some() {
        debug!(tile = %request.coord(), error = %error, "Falling back to stale cached tile");
        request.complete();
    } else {
        request.emit_error(error);
    }
}

async fn run<F: TileFetch>(
    inner: Arc<Inner<F>>,
    request: Arc<TileRequest>,
    cancellation: CancellationToken,
) {
    let coord = request.coord();

    let cached = match inner.cache.get(&coord).await {
        Ok(cached) => cached,
        Err(e) => {
            warn!(tile = %coord, error = %e, "Cache lookup failed, downloading");
            None
        }
    };

    if let Some(tile) = &cached {
        if is_fresh(tile, inner.stale_after) {
            debug!(tile = %coord, "Serving fresh cached tile");
            request.emit_data(tile.data.clone(), true);
            return;
        }
        // Show the stale tile while the origin is consulted.
        request.emit_data(tile.data.clone(), false);
    }

    if cancellation.is_cancelled() {
        finish_cancelled(&request);
        return;
    }

    let url = build_url(&inner.url_template, &coord);
    let conditional = cached.as_ref().and_then(conditional_for);

    let response = tokio::select! {
        _ = cancellation.cancelled() => {
            finish_cancelled(&request);
            return;
        }
        response = inner.fetcher.get(&url, conditional.as_ref()) => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(FetchError::MalformedUrl(msg)) => {
            finish_with_fallback(&request, DataSourceError::MalformedUrl(msg));
            return;
        }
        Err(FetchError::Network(msg)) => {
            finish_with_fallback(&request, DataSourceError::Network(msg));
            return;
        }
    };

    if response.is_not_modified() {
        debug!(tile = %coord, "Origin confirmed cached tile");
        if let Err(e) = inner.cache.mark_up_to_date(&coord).await {
            warn!(tile = %coord, error = %e, "Failed to refresh cached tile timestamp");
        }
        // A 304 implies a validator, which implies an emitted stale tile.
        if request.data().is_some() {
            request.complete();
        } else {
            request.emit_error(DataSourceError::BadResponse {
                status: response.status,
                reason: "not modified without a cached tile".to_string(),
            });
        }
        return;
    }

    if !response.is_success() {
        finish_with_fallback(
            &request,
            DataSourceError::BadResponse {
                status: response.status,
                reason: format!("HTTP {} from {}", response.status, url),
            },
        );
        return;
    }

    let body = response.body;
    if body.is_empty() {
        finish_with_fallback(
            &request,
            DataSourceError::BadResponse {
                status: response.status,
                reason: "empty response body".to_string(),
            },
        );
        return;
    }

    let emitted = request.emit_data(body.clone(), true);
    if !emitted {
        // Origin sent bytes identical to the stale emission.
        request.complete();
    }

    let cache = inner.cache.clone();
    let etag = response.etag;
    tokio::spawn(async move {
        if let Err(e) = cache.store(&coord, body, etag).await {
            warn!(tile = %coord, error = %e, "Failed to store downloaded tile");
        }
    });
}
