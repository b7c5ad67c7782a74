//! REST page fetcher for the tracking service
//!
//! Geofences are listed per device and geohash cell:
//! `GET {base}/client/devices/{device_id}/geofences?geohash=..&pagination_token=..&include_markers=true`
//! (the same endpoint without `geohash` lists every geofence of the device)
//! and fetched individually with `GET {base}/client/geofences/{id}`.

use crate::core::geo::LatLng;
use crate::data::geofence::{Geofence, GeofenceId, Marker};
use crate::tiles::source::{FetchError, PageFetcher, PageRequest, PageResult, PageToken};
use crate::traits::DeviceIdentity;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("fencemap/", env!("CARGO_PKG_VERSION"));

/// Fetches geofence pages over HTTP with reqwest
pub struct HttpPageFetcher {
    client: reqwest::Client,
    base_url: String,
    device: Arc<dyn DeviceIdentity>,
    bearer_token: Option<String>,
}

impl HttpPageFetcher {
    pub fn new(base_url: impl Into<String>, device: Arc<dyn DeviceIdentity>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Runtime(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url, device))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        device: Arc<dyn DeviceIdentity>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device,
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn list(
        &self,
        geohash: Option<&str>,
        page_token: Option<&PageToken>,
    ) -> std::result::Result<PageResult, FetchError> {
        let url = format!(
            "{}/client/devices/{}/geofences",
            self.base_url,
            self.device.device_id()
        );
        let mut query = vec![
            ("include_archived", "false".to_string()),
            ("include_markers", "true".to_string()),
            ("sort_nearest", "true".to_string()),
        ];
        if let Some(geohash) = geohash {
            query.push(("geohash", geohash.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pagination_token", token.as_str().to_string()));
        }

        let response = self
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let page: GeofenceResponse = response.json().await.map_err(map_reqwest_error)?;
        log::debug!(
            "{} page returned {} geofences",
            geohash.unwrap_or("listing"),
            page.geofences.len()
        );
        page.try_into()
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> std::result::Result<PageResult, FetchError> {
        self.list(Some(request.tile.as_str()), request.page_token.as_ref())
            .await
    }

    async fn fetch_list_page(
        &self,
        page_token: Option<&PageToken>,
    ) -> std::result::Result<PageResult, FetchError> {
        self.list(None, page_token).await
    }

    async fn fetch_geofence(&self, id: &GeofenceId) -> std::result::Result<Geofence, FetchError> {
        let url = format!("{}/client/geofences/{}", self.base_url, id);
        let response = self.get(url).send().await.map_err(map_reqwest_error)?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            status if !status.is_success() => Err(FetchError::Status(status.as_u16())),
            _ => {
                let wire: WireGeofence = response.json().await.map_err(map_reqwest_error)?;
                wire.try_into()
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Network(e.to_string())
    }
}

/// One page of the geofence listing
#[derive(Debug, Deserialize)]
pub struct GeofenceResponse {
    #[serde(rename = "data")]
    pub geofences: Vec<WireGeofence>,
    pub pagination_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireGeofence {
    pub geofence_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub geometry: WireGeometry,
    #[serde(default)]
    pub markers: Option<WireMarkers>,
    #[serde(default)]
    pub radius: Option<u32>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WireGeometry {
    /// `[lng, lat]`
    Point { coordinates: Vec<f64> },
    /// Rings of `[lng, lat]`; the first is the outer ring
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
}

#[derive(Debug, Deserialize)]
pub struct WireMarkers {
    #[serde(rename = "data", default)]
    pub visits: Vec<WireVisit>,
}

#[derive(Debug, Deserialize)]
pub struct WireVisit {
    #[serde(default)]
    pub marker_id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub arrival: Option<WireRecorded>,
    #[serde(default)]
    pub exit: Option<WireRecorded>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireRecorded {
    pub recorded_at: DateTime<Utc>,
}

fn lat_lng(coordinates: &[f64]) -> std::result::Result<LatLng, FetchError> {
    match coordinates {
        [lng, lat, ..] => Ok(LatLng::new(*lat, *lng)),
        _ => Err(FetchError::Decode(format!(
            "expected [lng, lat], got {:?}",
            coordinates
        ))),
    }
}

impl TryFrom<GeofenceResponse> for PageResult {
    type Error = FetchError;

    fn try_from(page: GeofenceResponse) -> std::result::Result<Self, FetchError> {
        let records = page
            .geofences
            .into_iter()
            .map(Geofence::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(PageResult {
            records,
            next_token: page
                .pagination_token
                .filter(|token| !token.is_empty())
                .map(PageToken::new),
        })
    }
}

impl TryFrom<WireGeofence> for Geofence {
    type Error = FetchError;

    fn try_from(wire: WireGeofence) -> std::result::Result<Self, FetchError> {
        let (center, polygon) = match &wire.geometry {
            WireGeometry::Point { coordinates } => (lat_lng(coordinates)?, None),
            WireGeometry::Polygon { coordinates } => {
                let outer = coordinates
                    .first()
                    .ok_or_else(|| FetchError::Decode("polygon without rings".into()))?;
                let ring = outer
                    .iter()
                    .map(|c| lat_lng(c))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if ring.is_empty() {
                    return Err(FetchError::Decode("empty polygon ring".into()));
                }
                let n = ring.len() as f64;
                let center = LatLng::new(
                    ring.iter().map(|p| p.lat).sum::<f64>() / n,
                    ring.iter().map(|p| p.lng).sum::<f64>() / n,
                );
                (center, Some(ring))
            }
        };

        let metadata: BTreeMap<String, String> = wire
            .metadata
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();

        let markers = wire
            .markers
            .map(|m| m.visits)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|visit| {
                let arrived_at = visit.arrival.as_ref()?.recorded_at;
                Some(Marker {
                    device_id: visit.device_id,
                    arrived_at,
                    exited_at: visit.exit.map(|e| e.recorded_at),
                    marker_id: visit.marker_id,
                    address: visit.address,
                    duration_secs: visit.duration,
                })
            })
            .collect();

        Ok(Geofence {
            id: wire.geofence_id,
            name: metadata.get("name").cloned(),
            address: wire.address.or_else(|| metadata.get("address").cloned()),
            created_at: wire.created_at,
            center,
            polygon,
            radius: wire.radius,
            metadata,
            markers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "data": [
            {
                "geofence_id": "g1",
                "created_at": "2024-05-01T10:00:00Z",
                "metadata": { "name": "Depot", "address": "1 Main St", "floor": 2 },
                "geometry": { "type": "Point", "coordinates": [-122.4194, 37.7749] },
                "radius": 50,
                "markers": { "data": [
                    { "device_id": "d1", "marker_id": "m1",
                      "arrival": { "recorded_at": "2024-05-01T11:00:00Z" },
                      "exit": { "recorded_at": "2024-05-01T11:30:00Z" }, "duration": 1800 },
                    { "device_id": "d2" }
                ] }
            },
            {
                "geofence_id": "g2",
                "created_at": "2024-05-01T10:00:00Z",
                "address": "Warehouse",
                "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]]] }
            }
        ],
        "pagination_token": "next-1"
    }"#;

    #[test]
    fn test_decode_page() {
        let wire: GeofenceResponse = serde_json::from_str(PAGE).unwrap();
        let page = PageResult::try_from(wire).unwrap();
        assert_eq!(page.next_token, Some(PageToken::new("next-1")));

        let g1 = &page.records[0];
        assert_eq!(g1.name.as_deref(), Some("Depot"));
        assert_eq!(g1.address.as_deref(), Some("1 Main St"));
        assert_eq!(g1.metadata.get("floor").map(String::as_str), Some("2"));
        assert_eq!(g1.center, LatLng::new(37.7749, -122.4194));
        // the visit without an arrival is dropped
        assert_eq!(g1.markers.len(), 1);
        assert_eq!(g1.markers[0].duration_secs, Some(1800));

        let g2 = &page.records[1];
        assert!(g2.is_polygon());
        assert_eq!(g2.center, LatLng::new(1.0, 1.0));
        assert_eq!(g2.address.as_deref(), Some("Warehouse"));
    }

    #[test]
    fn test_bad_coordinates_are_decode_errors() {
        let wire = WireGeofence {
            geofence_id: "g".into(),
            created_at: Utc::now(),
            metadata: None,
            geometry: WireGeometry::Point {
                coordinates: vec![1.0],
            },
            markers: None,
            radius: None,
            address: None,
        };
        assert!(matches!(Geofence::try_from(wire), Err(FetchError::Decode(_))));
    }
}
