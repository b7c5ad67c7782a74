//! Prelude module for common fencemap types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use fencemap::prelude::*;`

pub use crate::core::{
    builder::GeofenceCacheBuilder,
    config::{CacheConfig, CacheProfile, LoadingConfig, ViewportConfig},
    geo::{LatLng, LatLngBounds, Point},
    geohash::{TileBounds, TileKey},
    viewport::Viewport,
};

pub use crate::data::{filter_for_device, Geofence, GeofenceId, GeofenceMap, Marker};

pub use crate::input::{
    coordinator::{TileSink, ViewportCoordinator},
    events::{CameraEvent, ViewportSignal},
};

pub use crate::observable::{Observable, Subscription};

pub use crate::runtime::{AsyncHandle, AsyncSpawner, TokioSpawner};

pub use crate::tiles::{
    cache::{GeofenceCache, TileFailure},
    index::{TileSnapshot, TileState, TileStatus},
    listing::GeofencePage,
    source::{FetchError, PageFetcher, PageRequest, PageResult, PageToken},
    stats::CacheStats,
};

pub use crate::traits::{Clock, DeviceIdentity, StaticDevice, SystemClock};

pub use crate::{Error as CacheError, Result};

pub use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};

pub use futures::Future;
