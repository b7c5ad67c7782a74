//! Core constants shared by the viewport, the coordinator and the cache.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels for the Web Mercator projection.
pub const TILE_SIZE: u32 = 256;

/// Geohash length the tracking service buckets geofences by.
pub const DEFAULT_PRECISION: usize = 4;

/// Geohash length used to pick candidates for the adjacency check.
pub const ADJACENCY_PRECISION: usize = 5;

/// Quiet window after the last camera event before tiles are computed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Largest covering set the coordinator will request at once.
pub const DEFAULT_MAX_TILES: usize = 36;

/// Pages a single tile may chain before the backend is considered broken.
pub const DEFAULT_MAX_PAGES_PER_TILE: usize = 50;

/// Viewport size assumed when a camera event carries none (pixels).
pub const DEFAULT_VIEWPORT_SIZE: (f64, f64) = (1080.0, 1920.0);

/// Zoom range accepted by [`crate::core::viewport::Viewport`].
pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 22.0;

/// Spacing of the points sampled along polygon edges for overlap checks (meters).
pub const EDGE_SAMPLE_SPACING_M: f64 = 25.0;
