//! # fencemap
//!
//! Geospatial tile cache and viewport-driven fetch orchestration for
//! geofence maps.
//!
//! The visible map region is covered with geohash tiles. Each tile is
//! fetched page by page from a remote tracking service, merged into a
//! per-tile record set and published to subscribers through observable
//! containers. A debounced viewport coordinator turns camera movements
//! into tile requests.

pub mod core;
pub mod data;
pub mod input;
pub mod observable;
pub mod prelude;
pub mod runtime;
pub mod spatial;
pub mod tiles;
pub mod traits;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    builder::GeofenceCacheBuilder,
    config::{CacheConfig, CacheProfile, LoadingConfig, ViewportConfig},
    geo::{LatLng, LatLngBounds, Point},
    geohash::{TileBounds, TileKey},
    viewport::Viewport,
};

pub use data::{filter_for_device, Geofence, GeofenceId, GeofenceMap, Marker};

pub use input::{
    coordinator::{TileSink, ViewportCoordinator},
    events::{CameraEvent, ViewportSignal},
};

pub use observable::{Observable, Subscription};

pub use tiles::{
    cache::{GeofenceCache, TileFailure},
    index::{TileSnapshot, TileState, TileStatus},
    listing::GeofencePage,
    source::{FetchError, PageFetcher, PageRequest, PageResult, PageToken},
    stats::CacheStats,
};

#[cfg(feature = "http")]
pub use tiles::http::HttpPageFetcher;

pub use traits::{Clock, DeviceIdentity, StaticDevice, SystemClock};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid tile key: {0}")]
    InvalidTileKey(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Geofence cache has shut down")]
    Closed,
}

/// Error type alias for convenience
pub type Error = CacheError;

/// Installs `env_logger` as the `log` backend, honouring `RUST_LOG`
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
