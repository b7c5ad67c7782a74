//! Shared fixtures for the cache integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fencemap::{
    Clock, FetchError, Geofence, GeofenceId, LatLng, Marker, PageFetcher, PageRequest, PageResult,
    PageToken,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Notify};

pub type Reply = oneshot::Sender<Result<PageResult, FetchError>>;

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
}

pub fn fence(id: &str) -> Geofence {
    Geofence::new(id, LatLng::new(37.77, -122.41), at(0)).with_radius(50)
}

pub fn fence_visited(id: &str, device: &str, hour: u32) -> Geofence {
    fence(id).with_marker(Marker::new(device, at(hour)))
}

/// Hands every page request to the test, which answers through the reply
/// channel whenever it chooses
pub struct ScriptedFetcher {
    requests: mpsc::UnboundedSender<(PageRequest, Reply)>,
}

impl ScriptedFetcher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(PageRequest, Reply)>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { requests }), receiver)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult, FetchError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send((request.clone(), reply))
            .map_err(|_| FetchError::Network("test script gone".into()))?;
        response
            .await
            .unwrap_or_else(|_| Err(FetchError::Network("reply dropped".into())))
    }
}

/// Answers every request immediately with an empty last page and records
/// which tiles were asked for
#[derive(Default)]
pub struct RecordingFetcher {
    pub requested: Mutex<Vec<PageRequest>>,
}

#[async_trait]
impl PageFetcher for RecordingFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult, FetchError> {
        self.requested.lock().unwrap().push(request.clone());
        Ok(PageResult::last(vec![fence(&format!("fence-{}", request.tile))]))
    }
}

/// Never stops paginating
pub struct EndlessFetcher;

#[async_trait]
impl PageFetcher for EndlessFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult, FetchError> {
        let next = format!("{}-next", request.page_token.as_ref().map_or("p", |t| t.as_str()));
        Ok(PageResult::more(vec![fence("endless")], next))
    }
}

/// Fetches by id and listing pages signal `entered`, then hold until
/// `release`; tile pages are empty
#[derive(Default)]
pub struct GatedFetcher {
    pub entered: Notify,
    pub release: Notify,
    pub list_calls: AtomicUsize,
}

#[async_trait]
impl PageFetcher for GatedFetcher {
    async fn fetch_page(&self, _request: &PageRequest) -> Result<PageResult, FetchError> {
        Ok(PageResult::default())
    }

    async fn fetch_geofence(&self, id: &GeofenceId) -> Result<Geofence, FetchError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(fence(id))
    }

    async fn fetch_list_page(&self, _page_token: Option<&PageToken>) -> Result<PageResult, FetchError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.notify_one();
        self.release.notified().await;
        Ok(PageResult::last(vec![fence(&format!("listed-{}", call))]))
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
