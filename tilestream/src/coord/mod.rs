//! Tile coordinate types for the slippy-map grid.

mod types;

pub use types::{TileCoord, MAX_ZOOM, MIN_ZOOM};
