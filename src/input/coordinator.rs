//! Debounced camera-to-tiles coordination
//!
//! Camera events arrive at an unbounded rate while the user pans and zooms.
//! The coordinator task keeps only the latest one and acts on it once no new
//! event has arrived for the configured quiet window: it covers the visible
//! region with geohash tiles at the precision configured for the zoom level
//! and hands them to a [`TileSink`], or signals that the view is too large.

use crate::core::config::ViewportConfig;
use crate::core::geo::LatLng;
use crate::core::geohash::TileKey;
use crate::core::viewport::Viewport;
use crate::input::events::{CameraEvent, ViewportSignal};
use crate::observable::Observable;
use crate::prelude::HashSet;
use crate::runtime::{spawn, AsyncHandle, AsyncSpawner};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiver of the tiles a viewport needs
pub trait TileSink: Send + Sync {
    fn ensure_tiles(&self, tiles: Vec<TileKey>);
}

/// Debounces camera events into tile requests
pub struct ViewportCoordinator {
    events: mpsc::UnboundedSender<CameraEvent>,
    signals: Observable<ViewportSignal>,
    task: Box<dyn AsyncHandle>,
}

impl ViewportCoordinator {
    pub fn new(sink: Arc<dyn TileSink>, config: ViewportConfig, spawner: &dyn AsyncSpawner) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let signals = Observable::new();
        let worker = Worker {
            sink,
            config,
            signals: signals.clone(),
        };
        let task = spawn(spawner, worker.run(receiver));

        Self {
            events,
            signals,
            task,
        }
    }

    /// Reports that the camera settled at `center` and `zoom`
    pub fn on_camera_settled(&self, center: LatLng, zoom: f64) -> Result<()> {
        self.on_camera_event(CameraEvent::new(center, zoom))
    }

    pub fn on_camera_event(&self, event: CameraEvent) -> Result<()> {
        self.events.send(event).map_err(|_| Error::Closed)
    }

    /// Published once per debounced computation
    pub fn signals(&self) -> &Observable<ViewportSignal> {
        &self.signals
    }

    pub fn shutdown(&self) {
        self.task.cancel();
    }
}

impl Drop for ViewportCoordinator {
    fn drop(&mut self) {
        self.task.cancel();
    }
}

struct Worker {
    sink: Arc<dyn TileSink>,
    config: ViewportConfig,
    signals: Observable<ViewportSignal>,
}

impl Worker {
    async fn run(self, mut events: mpsc::UnboundedReceiver<CameraEvent>) {
        let quiet = self.config.debounce();
        let mut pending: Option<CameraEvent> = None;

        loop {
            match pending.take() {
                None => match events.recv().await {
                    Some(event) => pending = Some(event),
                    None => break,
                },
                Some(event) => {
                    tokio::select! {
                        next = events.recv() => match next {
                            Some(newer) => pending = Some(newer),
                            None => break,
                        },
                        _ = tokio::time::sleep(quiet) => self.settle(&event),
                    }
                }
            }
        }
        log::debug!("viewport coordinator stopped");
    }

    fn settle(&self, event: &CameraEvent) {
        match self.compute(event) {
            Ok(signal) => {
                if let ViewportSignal::TilesRequested { tiles, .. } = &signal {
                    self.sink.ensure_tiles(tiles.clone());
                }
                self.signals.publish(signal);
            }
            Err(e) => log::warn!("ignoring camera event at {:?}: {}", event.center, e),
        }
    }

    fn compute(&self, event: &CameraEvent) -> Result<ViewportSignal> {
        let size = event.size.unwrap_or(self.config.default_size);
        let viewport = Viewport::new(event.center, event.zoom, size);
        let precision = self.config.precision_for_zoom(viewport.zoom);

        let required = viewport.tile_count(precision);
        if required > self.config.max_tiles {
            log::warn!(
                "viewport needs {} tiles at precision {}, limit is {}",
                required,
                precision,
                self.config.max_tiles
            );
            return Ok(ViewportSignal::ZoomInToLoad {
                required,
                limit: self.config.max_tiles,
            });
        }

        let center = viewport.center;
        let home = TileKey::from_lat_lng(&center, precision)?;
        let mut tiles = viewport.covering_tiles(precision)?;
        let mut seen: HashSet<TileKey> = tiles.iter().cloned().collect();
        let mut extra = vec![home.clone()];
        if self.config.include_neighbors {
            extra.extend(home.neighbors()?);
        }
        for tile in extra {
            if seen.insert(tile.clone()) {
                tiles.push(tile);
            }
        }

        // home cell first, the rest by distance from the center
        tiles.sort_by(|a, b| {
            (*a != home)
                .cmp(&(*b != home))
                .then_with(|| {
                    a.center()
                        .distance_to(&center)
                        .total_cmp(&b.center().distance_to(&center))
                })
        });

        log::debug!(
            "camera settled at {:?} zoom {:.1}: {} tiles at precision {}",
            center,
            viewport.zoom,
            tiles.len(),
            precision
        );
        Ok(ViewportSignal::TilesRequested {
            center,
            precision,
            tiles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheProfile;
    use crate::core::geo::Point;
    use crate::runtime::TokioSpawner;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<TileKey>>>,
    }

    impl TileSink for RecordingSink {
        fn ensure_tiles(&self, tiles: Vec<TileKey>) {
            self.batches.lock().unwrap().push(tiles);
        }
    }

    fn config() -> ViewportConfig {
        let mut config = CacheProfile::Balanced.resolve().viewport;
        config.debounce_ms = 300;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_keeps_last_event() {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = ViewportCoordinator::new(sink.clone(), config(), &TokioSpawner::new());

        for i in 0..10 {
            coordinator
                .on_camera_settled(LatLng::new(37.0 + i as f64 * 0.1, -122.0), 12.0)
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let last = TileKey::from_lat_lng(&LatLng::new(37.9, -122.0), 4).unwrap();
        assert_eq!(batches[0][0], last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_capacity_signals_zoom_in() {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = ViewportCoordinator::new(sink.clone(), config(), &TokioSpawner::new());
        let signals = Arc::new(Mutex::new(Vec::new()));
        let recorded = signals.clone();
        let _sub = coordinator
            .signals()
            .subscribe(move |s: Arc<ViewportSignal>| recorded.lock().unwrap().push((*s).clone()));

        // zoom 6 uses precision 2 cells; a huge screen needs many of them
        coordinator
            .on_camera_event(CameraEvent::new(LatLng::new(45.0, 10.0), 6.0).with_size(Point::new(8000.0, 8000.0)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(sink.batches.lock().unwrap().is_empty());
        let signals = signals.lock().unwrap();
        assert_eq!(signals.len(), 1);
        match &signals[0] {
            ViewportSignal::ZoomInToLoad { required, limit } => {
                assert!(required > limit);
                assert_eq!(*limit, 36);
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_neighbors_included_and_center_first() {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = ViewportCoordinator::new(sink.clone(), config(), &TokioSpawner::new());
        let center = LatLng::new(37.7749, -122.4194);
        coordinator
            .on_camera_event(CameraEvent::new(center, 12.0).with_size(Point::new(200.0, 200.0)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let batches = sink.batches.lock().unwrap();
        let home = TileKey::from_lat_lng(&center, 4).unwrap();
        assert_eq!(batches[0][0], home);
        for n in home.neighbors().unwrap() {
            assert!(batches[0].contains(&n));
        }
    }
}
