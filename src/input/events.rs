//! Camera events from the map view and the signals derived from them

use crate::core::geo::{LatLng, Point};
use crate::core::geohash::TileKey;
use serde::{Deserialize, Serialize};

/// Camera position reported by the map view when it settles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub center: LatLng,
    pub zoom: f64,
    /// Viewport size in pixels; the configured default is used when absent
    #[serde(default)]
    pub size: Option<Point>,
}

impl CameraEvent {
    pub fn new(center: LatLng, zoom: f64) -> Self {
        Self {
            center,
            zoom,
            size: None,
        }
    }

    pub fn with_size(mut self, size: Point) -> Self {
        self.size = Some(size);
        self
    }
}

/// Outcome of a debounced viewport computation
#[derive(Debug, Clone, PartialEq)]
pub enum ViewportSignal {
    /// These tiles were handed to the cache, nearest to the center first
    TilesRequested {
        center: LatLng,
        precision: usize,
        tiles: Vec<TileKey>,
    },
    /// The view covers more tiles than allowed; nothing was loaded
    ZoomInToLoad { required: usize, limit: usize },
}

impl ViewportSignal {
    pub fn is_zoom_in(&self) -> bool {
        matches!(self, Self::ZoomInToLoad { .. })
    }
}
