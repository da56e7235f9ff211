//! Slippy-map tile coordinate math (Web Mercator, EPSG:3857)
//!
//! A tile `(x, y, zoom)` is one cell of a `2^zoom x 2^zoom` grid covering the
//! world, with `y = 0` at the northern edge. Latitudes are projected through
//! Mercator so that positions normalized into a tile line up with the pixels
//! of neighbouring tiles.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::geo::{LatLng, LatLngBounds};

/// Northern/southern limit of the Web Mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Fraction of a tile's angular size added on every side when deciding whether
/// a case belongs to the tile. Dots centered just outside an edge still bleed
/// into the tile and must be composited.
pub const TILE_PADDING_FRACTION: f64 = 0.05;

/// Index of one tile in the zoom-level grid. Used as the tile cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinates {
    pub x: u32,
    pub y: u32,
    pub zoom: u32,
}

impl TileCoordinates {
    pub const fn new(x: u32, y: u32, zoom: u32) -> Self {
        Self { x, y, zoom }
    }

    /// Number of tiles along each axis at this zoom.
    pub fn tiles_per_axis(&self) -> f64 {
        2f64.powi(self.zoom as i32)
    }

    /// The tile at `zoom` containing `point`.
    pub fn containing(point: LatLng, zoom: u32) -> Self {
        let n = 2f64.powi(zoom as i32);
        let max_index = (n as u32).saturating_sub(1);
        let x = ((point.longitude + 180.0) / 360.0 * n).floor().max(0.0) as u32;
        let y = ((1.0 - mercator_y(point.latitude) / PI) / 2.0 * n)
            .floor()
            .max(0.0) as u32;
        Self::new(x.min(max_index), y.min(max_index), zoom)
    }

    /// Geographic box covered by the tile.
    pub fn bounds(&self) -> LatLngBounds {
        let n = self.tiles_per_axis();
        let west = self.x as f64 / n * 360.0 - 180.0;
        let east = (self.x + 1) as f64 / n * 360.0 - 180.0;
        let north = tile_latitude(self.y as f64, n);
        let south = tile_latitude((self.y + 1) as f64, n);
        LatLngBounds::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// Latitude and longitude margins added around [`bounds`](Self::bounds).
    pub fn padding(&self) -> (f64, f64) {
        let bounds = self.bounds();
        (
            bounds.height() * TILE_PADDING_FRACTION,
            bounds.width() * TILE_PADDING_FRACTION,
        )
    }

    /// Bounds grown by [`padding`](Self::padding). Case queries for the tile
    /// use this window.
    pub fn padded_bounds(&self) -> LatLngBounds {
        let (lat, lng) = self.padding();
        self.bounds().expanded(lat, lng)
    }

    /// Maps `point` into the tile's local space, where `(0, 0)` is the
    /// northwest corner and `(1, 1)` the southeast corner.
    ///
    /// Points inside the padding margin produce values slightly outside
    /// `[0, 1]`. Points outside the padded bounds return `None`.
    pub fn normalize(&self, point: LatLng) -> Option<(f64, f64)> {
        if !self.padded_bounds().contains(point) {
            return None;
        }

        let bounds = self.bounds();
        let x = (point.longitude - bounds.west()) / bounds.width();

        let top = mercator_y(bounds.north());
        let bottom = mercator_y(bounds.south());
        let y = (top - mercator_y(point.latitude)) / (top - bottom);

        Some((x, y))
    }

    /// Inverse of [`normalize`](Self::normalize).
    pub fn point_at(&self, x_norm: f64, y_norm: f64) -> LatLng {
        let bounds = self.bounds();
        let longitude = bounds.west() + x_norm * bounds.width();

        let top = mercator_y(bounds.north());
        let bottom = mercator_y(bounds.south());
        let projected = top - y_norm * (top - bottom);

        LatLng::new(projected.sinh().atan().to_degrees(), longitude)
    }
}

impl std::fmt::Display for TileCoordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Northern edge latitude of tile row `y` in a grid of `n` rows.
fn tile_latitude(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Mercator-projected y in radians, clamped to the projection's limits.
fn mercator_y(latitude: f64) -> f64 {
    let lat = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    lat.tan().asinh()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_zoom_zero_covers_world() {
        let bounds = TileCoordinates::new(0, 0, 0).bounds();
        assert!((bounds.west() + 180.0).abs() < EPS);
        assert!((bounds.east() - 180.0).abs() < EPS);
        assert!((bounds.north() - MAX_LATITUDE).abs() < 1e-6);
        assert!((bounds.south() + MAX_LATITUDE).abs() < 1e-6);
    }

    #[test]
    fn test_tile_size_halves_per_zoom() {
        let z1 = TileCoordinates::new(0, 0, 1).bounds();
        let z2 = TileCoordinates::new(0, 0, 2).bounds();
        assert!((z1.width() - 180.0).abs() < EPS);
        assert!((z2.width() - 90.0).abs() < EPS);

        // Northern-western quadrant at zoom 1 meets the equator and prime meridian
        assert!(z1.south().abs() < EPS);
        assert!(z1.east().abs() < EPS);
    }

    #[test]
    fn test_adjacent_tiles_share_edges() {
        let a = TileCoordinates::new(3, 5, 4).bounds();
        let right = TileCoordinates::new(4, 5, 4).bounds();
        let below = TileCoordinates::new(3, 6, 4).bounds();
        assert!((a.east() - right.west()).abs() < EPS);
        assert!((a.south() - below.north()).abs() < EPS);
    }

    #[test]
    fn test_normalize_corners_and_center() {
        let tile = TileCoordinates::new(1, 1, 2);
        let bounds = tile.bounds();

        let (x, y) = tile.normalize(northwest(&bounds)).unwrap();
        assert!(x.abs() < EPS && y.abs() < EPS);

        let (x, y) = tile.normalize(southeast(&bounds)).unwrap();
        assert!((x - 1.0).abs() < EPS && (y - 1.0).abs() < EPS);

        let center = tile.point_at(0.5, 0.5);
        let (x, y) = tile.normalize(center).unwrap();
        assert!((x - 0.5).abs() < 1e-6 && (y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_inside_padding() {
        let tile = TileCoordinates::new(2, 1, 2);
        let bounds = tile.bounds();
        let (_, lng_pad) = tile.padding();

        let just_west = LatLng::new(
            bounds.south() + bounds.height() / 2.0,
            bounds.west() - lng_pad / 2.0,
        );
        let (x, _) = tile.normalize(just_west).unwrap();
        assert!(x < 0.0 && x > -TILE_PADDING_FRACTION);
    }

    #[test]
    fn test_normalize_outside_padding() {
        let tile = TileCoordinates::new(2, 1, 2);
        let bounds = tile.bounds();
        let far_west = LatLng::new(
            bounds.south() + 1.0,
            bounds.west() - bounds.width() * 0.5,
        );
        assert!(tile.normalize(far_west).is_none());
    }

    #[test]
    fn test_containing_round_trips_point_at() {
        let tile = TileCoordinates::new(37, 80, 8);
        let point = tile.point_at(0.25, 0.75);
        assert_eq!(TileCoordinates::containing(point, 8), tile);
    }

    fn northwest(bounds: &LatLngBounds) -> LatLng {
        LatLng::new(bounds.north(), bounds.west())
    }

    fn southeast(bounds: &LatLngBounds) -> LatLng {
        LatLng::new(bounds.south(), bounds.east())
    }
}
