//! Camera viewport and the geohash tiles it covers

use crate::core::constants::{MAX_ZOOM, MIN_ZOOM};
use crate::core::geo::{project, unproject, world_size, LatLng, LatLngBounds, Point};
use crate::core::geohash::{covering, covering_len, TileKey};
use crate::Result;
use serde::{Deserialize, Serialize};

/// The visible part of the map: center, zoom, and screen dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// The center of the map view in geographical coordinates
    pub center: LatLng,
    /// The current zoom level
    pub zoom: f64,
    /// The size of the viewport in pixels
    pub size: Point,
}

impl Viewport {
    /// Creates a viewport; zoom is clamped to the supported range and the
    /// center latitude to the Web Mercator range
    pub fn new(center: LatLng, zoom: f64, size: Point) -> Self {
        Self {
            center: LatLng::new(LatLng::clamp_lat(center.lat), LatLng::wrap_lng(center.lng)),
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            size,
        }
    }

    pub fn set_center(&mut self, center: LatLng) {
        self.center = LatLng::new(LatLng::clamp_lat(center.lat), LatLng::wrap_lng(center.lng));
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Gets the current viewport bounds in geographical coordinates.
    ///
    /// Longitudes are left unwrapped so a view across the antimeridian has
    /// `west > 180` or `east < -180`; the geohash covering handles both.
    pub fn bounds(&self) -> LatLngBounds {
        let center_px = project(&self.center, self.zoom);
        let half = Point::new(self.size.x / 2.0, self.size.y / 2.0);

        let nw = unproject(&center_px.subtract(&half), self.zoom);
        let se = unproject(&center_px.add(&half), self.zoom);

        LatLngBounds::new(
            LatLng::new(LatLng::clamp_lat(se.lat), nw.lng),
            LatLng::new(LatLng::clamp_lat(nw.lat), se.lng),
        )
    }

    /// Number of tiles of `precision` covering the view
    pub fn tile_count(&self, precision: usize) -> usize {
        covering_len(&self.bounds(), precision)
    }

    /// Tiles of `precision` covering the view
    pub fn covering_tiles(&self, precision: usize) -> Result<Vec<TileKey>> {
        covering(&self.bounds(), precision)
    }

    /// Gets the resolution in meters per pixel at the center
    pub fn resolution(&self) -> f64 {
        let earth_circumference = 40_075_016.0;
        earth_circumference * self.center.lat.to_radians().cos() / world_size(self.zoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_creation() {
        let viewport = Viewport::new(LatLng::new(40.7128, -74.0060), 10.0, Point::new(800.0, 600.0));

        assert_eq!(viewport.zoom, 10.0);
        assert_eq!(viewport.center.lat, 40.7128);
        assert_eq!(viewport.size.x, 800.0);

        let clamped = Viewport::new(LatLng::new(89.0, 0.0), 40.0, Point::new(1.0, 1.0));
        assert_eq!(clamped.zoom, MAX_ZOOM);
        assert!(clamped.center.lat < 86.0);
    }

    #[test]
    fn test_bounds_contain_center_and_scale_with_zoom() {
        let center = LatLng::new(37.7749, -122.4194);
        let near = Viewport::new(center, 14.0, Point::new(1080.0, 1920.0));
        let far = Viewport::new(center, 10.0, Point::new(1080.0, 1920.0));

        assert!(near.bounds().contains(&center));
        assert!(far.bounds().span().lng > near.bounds().span().lng * 15.0);
        // portrait view is taller than wide in pixels
        let span = near.bounds().span();
        assert!(span.lat * 111_000.0 > span.lng * 111_000.0 * center.lat.to_radians().cos());
    }

    #[test]
    fn test_setters_clamp_and_resolution() {
        let mut viewport = Viewport::new(LatLng::new(0.0, 0.0), 0.0, Point::new(256.0, 256.0));
        assert!((viewport.resolution() - 156_543.03).abs() < 0.1);

        viewport.set_zoom(-3.0);
        assert_eq!(viewport.zoom, MIN_ZOOM);
        viewport.set_center(LatLng::new(0.0, 190.0));
        assert!((viewport.center.lng + 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_covering_tiles_contains_center_cell() {
        let center = LatLng::new(37.7749, -122.4194);
        let viewport = Viewport::new(center, 12.0, Point::new(1080.0, 1920.0));
        let tiles = viewport.covering_tiles(4).unwrap();
        assert_eq!(tiles.len(), viewport.tile_count(4));
        assert!(tiles.contains(&TileKey::from_lat_lng(&center, 4).unwrap()));
    }
}
