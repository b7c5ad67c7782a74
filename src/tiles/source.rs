//! Page fetcher seam and the page/request types it exchanges

use crate::core::geohash::{TileBounds, TileKey};
use crate::data::geofence::{Geofence, GeofenceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque continuation token returned by the backend for the next page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(pub String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One page request for one tile
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub tile: TileKey,
    pub bounds: TileBounds,
    /// `None` for the first page
    pub page_token: Option<PageToken>,
}

impl PageRequest {
    pub fn first(tile: TileKey) -> Self {
        Self {
            bounds: tile.bounds(),
            tile,
            page_token: None,
        }
    }

    pub fn next(tile: TileKey, token: PageToken) -> Self {
        Self {
            bounds: tile.bounds(),
            tile,
            page_token: Some(token),
        }
    }
}

/// One page of records; `next_token` is `None` on the last page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub records: Vec<Geofence>,
    pub next_token: Option<PageToken>,
}

impl PageResult {
    pub fn last(records: Vec<Geofence>) -> Self {
        Self {
            records,
            next_token: None,
        }
    }

    pub fn more(records: Vec<Geofence>, token: impl Into<PageToken>) -> Self {
        Self {
            records,
            next_token: Some(token.into()),
        }
    }
}

impl From<String> for PageToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Failure of a single fetch; contained to the tile it was made for
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("geofence not found")]
    NotFound,

    #[error("operation not supported by this fetcher")]
    Unsupported,
}

/// Anything that can produce pages of geofences for a tile.
///
/// Implementations must be safe to call concurrently for different tiles;
/// the cache never issues two concurrent calls for the same tile.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult, FetchError>;

    /// Fetch a single geofence by id, for detail screens
    async fn fetch_geofence(&self, _id: &GeofenceId) -> Result<Geofence, FetchError> {
        Err(FetchError::Unsupported)
    }

    /// One page of every geofence visible to the device, regardless of
    /// location, for list screens. `None` asks for the first page.
    async fn fetch_list_page(&self, _page_token: Option<&PageToken>) -> Result<PageResult, FetchError> {
        Err(FetchError::Unsupported)
    }
}
