//! Coordinate type definitions

use std::fmt;

/// Lowest zoom level commonly served by tile services.
pub const MIN_ZOOM: u8 = 0;

/// Highest zoom level commonly served by tile services.
///
/// Advisory only; the pipeline itself does not reject coordinates outside
/// this range. Validation against a source's real zoom range is the
/// caller's responsibility.
pub const MAX_ZOOM: u8 = 20;

/// Tile coordinates in the slippy-map grid.
///
/// `x` counts columns from the west edge, `y` counts rows from the north
/// edge (XYZ convention). Some tile services number rows from the south
/// instead; see [`TileCoord::tms_y`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// X coordinate (east-west), 0 at west
    pub x: u32,
    /// Y coordinate (north-south), 0 at north
    pub y: u32,
    /// Zoom level
    pub zoom: u8,
}

impl TileCoord {
    /// Create a new tile coordinate.
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Returns the row index counted from the bottom of the map
    /// (TMS convention): `2^zoom - y - 1`.
    ///
    /// Used for `{tmsy}` URL template substitution. Coordinates outside
    /// the grid saturate (a `y` beyond the row count maps to 0) rather
    /// than overflowing.
    #[inline]
    pub fn tms_y(&self) -> u32 {
        let rows = 1u64 << u32::from(self.zoom).min(32);
        rows.saturating_sub(u64::from(self.y) + 1) as u32
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
