//! Cache path construction and cache-key canonicalization.

use crate::coord::TileCoord;
use std::path::{Path, PathBuf};

/// Canonicalize a URL template into an identifier-safe cache key.
///
/// Every character outside `[A-Za-z0-9_]` is replaced with `_`, so two
/// downloaders with different URL templates never collide in the same disk
/// cache directory.
///
/// # Example
///
/// ```
/// use tilestream::cache::canonical_cache_key;
///
/// let key = canonical_cache_key("https://tile.example.com/{z}/{x}/{y}.png");
/// assert_eq!(key, "https___tile_example_com__z___x___y__png");
/// ```
pub fn canonical_cache_key(url_template: &str) -> String {
    url_template
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Relative blob name for a tile within a cache namespace:
/// `<zoom>/<x>/<y>.png`.
///
/// The extension is a placeholder; the cache is content-type agnostic and
/// never inspects the bytes. This name doubles as the metadata store's
/// primary key.
pub fn tile_blob_name(coord: &TileCoord) -> String {
    format!("{}/{}/{}.png", coord.zoom, coord.x, coord.y)
}

/// Full path of a tile blob under the namespaced cache directory.
pub fn tile_blob_path(namespace_dir: &Path, coord: &TileCoord) -> PathBuf {
    namespace_dir
        .join(coord.zoom.to_string())
        .join(coord.x.to_string())
        .join(format!("{}.png", coord.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_cache_key_replaces_punctuation() {
        assert_eq!(
            canonical_cache_key("https://a.b/{z}/{x}/{y}.png"),
            "https___a_b__z___x___y__png"
        );
    }

    #[test]
    fn test_canonical_cache_key_keeps_alphanumerics() {
        assert_eq!(canonical_cache_key("abcXYZ019"), "abcXYZ019");
    }

    #[test]
    fn test_canonical_cache_key_distinct_templates() {
        let a = canonical_cache_key("https://tiles.example.com/{z}/{x}/{y}.png");
        let b = canonical_cache_key("https://other.example.com/{z}/{x}/{y}.png");
        assert_ne!(a, b);
    }

    #[test]
    fn test_tile_blob_name() {
        let coord = TileCoord::new(2, 3, 5);
        assert_eq!(tile_blob_name(&coord), "5/2/3.png");
    }

    #[test]
    fn test_tile_blob_path() {
        let coord = TileCoord::new(12, 7, 9);
        let path = tile_blob_path(Path::new("/cache/osm"), &coord);
        assert_eq!(path, PathBuf::from("/cache/osm/9/12/7.png"));
    }

    #[test]
    fn test_blob_name_matches_blob_path() {
        let coord = TileCoord::new(100, 200, 15);
        let path = tile_blob_path(Path::new("/root"), &coord);
        assert_eq!(path, Path::new("/root").join(tile_blob_name(&coord)));
    }
}
