//! Single tile download command.

use clap::Args;
use std::path::PathBuf;
use tilestream::coord::{TileCoord, MAX_ZOOM};
use tilestream::source::{DataSource, TileDownloader, TileDownloaderConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;

/// Arguments for the `fetch` command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Tile column (x)
    pub x: u32,

    /// Tile row (y), counted from the north
    pub y: u32,

    /// Zoom level
    pub zoom: u8,

    /// URL template with {x}, {y}, {z} and {tmsy} placeholders
    #[arg(short, long)]
    pub template: String,

    /// Output file path (defaults to tile_<z>_<x>_<y>.png)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Cache directory (defaults to the user cache directory)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Check that the requested tile lies on the slippy-map grid before any
/// network or cache work happens.
fn validate(args: &FetchArgs) -> Result<(), CliError> {
    if args.zoom > MAX_ZOOM {
        return Err(CliError::InvalidTile(format!(
            "zoom {} exceeds the maximum of {}",
            args.zoom, MAX_ZOOM
        )));
    }
    let extent = 1u64 << args.zoom;
    if u64::from(args.x) >= extent || u64::from(args.y) >= extent {
        return Err(CliError::InvalidTile(format!(
            "{}/{} is outside the {}x{} grid at zoom {}",
            args.x, args.y, extent, extent, args.zoom
        )));
    }
    Ok(())
}

/// Run the `fetch` command.
pub async fn run(args: FetchArgs) -> Result<(), CliError> {
    validate(&args)?;
    let coord = TileCoord::new(args.x, args.y, args.zoom);

    let mut config = TileDownloaderConfig::new(&args.template);
    if let Some(dir) = args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    let downloader = TileDownloader::new(config).map_err(CliError::Client)?;

    // Ctrl-C aborts the in-flight download cleanly.
    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation.cancel();
            }
        });
    }

    info!(tile = %coord, template = %args.template, "Fetching tile");
    let bytes = downloader
        .get_tile_data(coord, cancellation)
        .await
        .map_err(CliError::Download)?;

    let output = args
        .output
        .unwrap_or_else(|| format!("tile_{}_{}_{}.png", coord.zoom, coord.x, coord.y));
    std::fs::write(&output, &bytes).map_err(|error| CliError::FileWrite {
        path: output.clone(),
        error,
    })?;

    println!("Wrote {} bytes to {}", bytes.len(), output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(x: u32, y: u32, zoom: u8) -> FetchArgs {
        FetchArgs {
            x,
            y,
            zoom,
            template: "https://tiles.test/{z}/{x}/{y}.png".into(),
            output: None,
            cache_dir: None,
        }
    }

    #[test]
    fn test_rejects_excessive_zoom() {
        match validate(&args(0, 0, 32)) {
            Err(CliError::InvalidTile(msg)) => assert!(msg.contains("zoom 32")),
            other => panic!("expected InvalidTile, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_coordinates_outside_grid() {
        // Zoom 3 has an 8x8 grid.
        match validate(&args(8, 0, 3)) {
            Err(CliError::InvalidTile(msg)) => assert!(msg.contains("8x8")),
            other => panic!("expected InvalidTile, got {other:?}"),
        }
        match validate(&args(0, 9, 3)) {
            Err(CliError::InvalidTile(_)) => {}
            other => panic!("expected InvalidTile, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_grid_edges() {
        assert!(validate(&args(7, 7, 3)).is_ok());
        assert!(validate(&args(0, 0, 0)).is_ok());
        assert!(validate(&args(0, 0, MAX_ZOOM)).is_ok());
    }
}
