//! Tilestream - map tile acquisition pipeline
//!
//! This library obtains a map tile's raw bytes for (x, y, zoom) coordinates
//! using a two-tier cache (in-memory LRU and persistent disk cache) in front
//! of a network fetch, honoring HTTP freshness semantics (ETag / conditional
//! revalidation).
//!
//! # High-Level API
//!
//! ```ignore
//! use tilestream::coord::TileCoord;
//! use tilestream::source::{DataSource, TileDownloader, TileDownloaderConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = TileDownloaderConfig::new("https://tile.example.com/{z}/{x}/{y}.png");
//! let downloader = TileDownloader::new(config)?;
//!
//! // Multi-emission request: a stale cached tile may arrive first,
//! // followed by a fresher copy from the network.
//! let request = downloader.start_request(TileCoord::new(2, 3, 5), CancellationToken::new());
//! let bytes = request.wait().await?;
//! ```

pub mod cache;
pub mod coord;
pub mod logging;
pub mod source;

/// Version of the tilestream library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
