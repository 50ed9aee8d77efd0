//! Tile data sources.
//!
//! A [`DataSource`] produces raw tile bytes for a coordinate, reporting
//! progress through a [`TileRequest`] that may emit intermediate data
//! (a stale cached tile) before the final result. [`TileDownloader`] is
//! the HTTP implementation with a disk cache in front.

mod downloader;
mod http;
mod request;

pub use downloader::{TileDownloader, TileDownloaderConfig, DEFAULT_STALE_AFTER};
pub use http::{Conditional, FetchError, HttpTileFetcher, TileFetch, TileResponse};
pub use request::{RequestState, TileRequest};

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::coord::TileCoord;

/// Errors a data source can report on a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataSourceError {
    /// The request was cancelled before a result was produced
    #[error("request was cancelled")]
    Cancelled,

    /// The URL built for the tile was not a valid URL
    #[error("malformed tile URL: {0}")]
    MalformedUrl(String),

    /// The origin answered with a non-success status
    #[error("unexpected HTTP status {status}: {reason}")]
    BadResponse { status: u16, reason: String },

    /// The request never produced a response
    #[error("network error: {0}")]
    Network(String),
}

/// Something that can produce tile data for a coordinate.
///
/// `start_request` returns immediately; the returned request observes the
/// work as it progresses and may see a stale tile before the final one.
/// Callers that only want the end result use [`DataSource::get_tile_data`].
pub trait DataSource: Send + Sync {
    /// Begin fetching a tile.
    ///
    /// # Arguments
    ///
    /// * `coord` - The tile to fetch
    /// * `cancellation` - Token aborting in-flight network work when
    ///   triggered
    fn start_request(
        &self,
        coord: TileCoord,
        cancellation: CancellationToken,
    ) -> Arc<TileRequest>;

    /// Fetch a tile and wait for the final bytes, skipping intermediate
    /// emissions.
    fn get_tile_data(
        &self,
        coord: TileCoord,
        cancellation: CancellationToken,
    ) -> impl Future<Output = Result<Bytes, DataSourceError>> + Send
    where
        Self: Sized,
    {
        let request = self.start_request(coord, cancellation);
        async move { request.wait().await }
    }
}
