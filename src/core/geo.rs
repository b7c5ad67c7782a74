//! Coordinates, bounding boxes and the Web Mercator projection used to turn
//! a camera position into a geographic viewport

use crate::core::constants::TILE_SIZE;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean Earth radius used for great-circle distances (meters)
pub const EARTH_RADIUS: f64 = 6_371_008.8;

/// Web Mercator latitude limit
pub const MAX_LATITUDE: f64 = 85.0511287798;

/// WGS84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and inside [-90, 90] x [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        let lat1_rad = self.lat.to_radians();
        let lat2_rad = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lng = (other.lng - self.lng).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS * c
    }

    /// Linear interpolation towards `other`; adequate for the short edges
    /// of geofence polygons
    pub fn interpolate(&self, other: &LatLng, fraction: f64) -> LatLng {
        LatLng::new(
            self.lat + (other.lat - self.lat) * fraction,
            self.lng + (other.lng - self.lng) * fraction,
        )
    }

    /// Wraps longitude to [-180, 180] range
    pub fn wrap_lng(lng: f64) -> f64 {
        let wrapped = lng % 360.0;
        if wrapped > 180.0 {
            wrapped - 360.0
        } else if wrapped < -180.0 {
            wrapped + 360.0
        } else {
            wrapped
        }
    }

    /// Clamps latitude to the Web Mercator range
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Screen size or projected pixel position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Geographic bounding box; tiles and viewports both use it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    pub fn from_coords(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// Inclusive on every edge
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.south_west.lat
            && point.lat <= self.north_east.lat
            && point.lng >= self.south_west.lng
            && point.lng <= self.north_east.lng
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }

    /// Height and width in degrees
    pub fn span(&self) -> LatLng {
        LatLng::new(
            self.north_east.lat - self.south_west.lat,
            self.north_east.lng - self.south_west.lng,
        )
    }

    /// Corner points in drawing order: bottom-left, bottom-right, top-right, top-left
    pub fn corners(&self) -> [LatLng; 4] {
        [
            self.south_west,
            LatLng::new(self.south_west.lat, self.north_east.lng),
            self.north_east,
            LatLng::new(self.north_east.lat, self.south_west.lng),
        ]
    }
}

/// Width of the Web Mercator world in pixels at `zoom`
pub fn world_size(zoom: f64) -> f64 {
    TILE_SIZE as f64 * 2_f64.powf(zoom)
}

/// Projects a coordinate to Web Mercator world pixels at `zoom`, origin
/// top-left
pub fn project(lat_lng: &LatLng, zoom: f64) -> Point {
    let scale = world_size(zoom);
    let lat_rad = LatLng::clamp_lat(lat_lng.lat).to_radians();
    let x = (lat_lng.lng + 180.0) / 360.0 * scale;
    let y = (1.0 - (PI / 4.0 + lat_rad / 2.0).tan().ln() / PI) / 2.0 * scale;
    Point::new(x, y)
}

/// Inverse of [`project`]
pub fn unproject(pixel: &Point, zoom: f64) -> LatLng {
    let scale = world_size(zoom);
    let lng = pixel.x / scale * 360.0 - 180.0;
    let n = PI - 2.0 * PI * pixel.y / scale;
    let lat = n.sinh().atan().to_degrees();
    LatLng::new(lat, lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lat_lng_creation() {
        let coord = LatLng::new(40.7128, -74.0060);
        assert_eq!(coord.lat, 40.7128);
        assert_eq!(coord.lng, -74.0060);
        assert!(coord.is_valid());
        assert!(!LatLng::new(91.0, 0.0).is_valid());
        assert!(!LatLng::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_lat_lng_distance() {
        let nyc = LatLng::new(40.7128, -74.0060);
        let la = LatLng::new(34.0522, -118.2437);
        let distance = nyc.distance_to(&la);

        // Distance should be approximately 3936 km
        assert!((distance - 3_936_000.0).abs() < 20_000.0);
    }

    #[test]
    fn test_projection_round_trip_center() {
        let origin = LatLng::new(37.7749, -122.4194);
        let back = unproject(&project(&origin, 12.0), 12.0);
        assert!((back.lat - origin.lat).abs() < 1e-9);
        assert!((back.lng - origin.lng).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_contains_and_corners() {
        let bounds = LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0);
        assert!(bounds.contains(&LatLng::new(40.5, -74.0)));
        assert!(!bounds.contains(&LatLng::new(42.0, -74.0)));

        let [bl, br, tr, tl] = bounds.corners();
        assert_eq!(bl, LatLng::new(40.0, -75.0));
        assert_eq!(br, LatLng::new(40.0, -73.0));
        assert_eq!(tr, LatLng::new(41.0, -73.0));
        assert_eq!(tl, LatLng::new(41.0, -75.0));
    }
}
