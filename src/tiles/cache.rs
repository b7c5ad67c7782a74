//! Tile cache engine
//!
//! [`GeofenceCache`] is a cheap, cloneable handle to an engine task that owns
//! the [`TileIndex`]. Public calls are turned into commands on an unbounded
//! channel and return immediately. Page fetches run as separate tasks and
//! report back to the engine tagged with their tile and generation, so every
//! mutation and every publication happens on the engine task, in order.

use crate::core::config::CacheConfig;
use crate::core::constants::DEFAULT_PRECISION;
use crate::core::geo::LatLng;
use crate::core::geohash::TileKey;
use crate::data::filter::{filter_collection, filter_for_device};
use crate::data::geofence::{merge_records, Geofence, GeofenceId, GeofenceMap};
use crate::input::coordinator::{TileSink, ViewportCoordinator};
use crate::observable::Observable;
use crate::prelude::HashMap;
use crate::runtime::{spawn, AsyncHandle, AsyncSpawner};
use crate::spatial::intersect::has_adjacent;
use crate::tiles::index::{PageOutcome, RequestOutcome, TileIndex, TileSnapshot, TileState};
use crate::tiles::listing::{GeofencePage, PageCache, PageReply};
use crate::tiles::source::{FetchError, PageFetcher, PageRequest, PageResult, PageToken};
use crate::tiles::stats::{CacheStats, StatsCounters};
use crate::traits::{Clock, DeviceIdentity};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Last failure of a tile, as published on [`GeofenceCache::failures`]
#[derive(Debug, Clone, PartialEq)]
pub struct TileFailure {
    pub tile: TileKey,
    pub cause: FetchError,
    pub at: DateTime<Utc>,
}

enum Command {
    Ensure(Vec<TileKey>),
    Refresh(TileKey),
    InvalidateAll,
    /// Locally created records, always current
    Insert(Vec<Geofence>),
    /// A record fetched by id while the cache was at `generation`
    Fetched {
        record: Geofence,
        generation: u64,
    },
    DeviceChanged,
    PageLoaded {
        tile: TileKey,
        generation: u64,
        result: std::result::Result<PageResult, FetchError>,
    },
    LoadPage {
        token: Option<PageToken>,
        reply: PageReply,
    },
    ListPageLoaded {
        token: Option<PageToken>,
        generation: u64,
        result: std::result::Result<PageResult, FetchError>,
    },
    Generation(oneshot::Sender<u64>),
    TileState(TileKey, oneshot::Sender<TileState>),
    WaitIdle(oneshot::Sender<()>),
}

/// Everything the engine publishes
struct Outputs {
    geofences: Observable<GeofenceMap>,
    added: Observable<Vec<Arc<Geofence>>>,
    diagnostics: Observable<Vec<TileSnapshot>>,
    loading: Observable<bool>,
    failures: Observable<TileFailure>,
    stats: StatsCounters,
}

/// Handle to the geofence tile cache
#[derive(Clone)]
pub struct GeofenceCache {
    commands: mpsc::UnboundedSender<Command>,
    outputs: Arc<Outputs>,
    fetcher: Arc<dyn PageFetcher>,
    device: Arc<dyn DeviceIdentity>,
    spawner: Arc<dyn AsyncSpawner>,
    config: Arc<CacheConfig>,
    engine: Arc<dyn AsyncHandle>,
}

impl GeofenceCache {
    /// Starts a builder with the two collaborators every cache needs
    pub fn builder(
        fetcher: Arc<dyn PageFetcher>,
        device: Arc<dyn DeviceIdentity>,
    ) -> crate::core::builder::GeofenceCacheBuilder {
        crate::core::builder::GeofenceCacheBuilder::new(fetcher, device)
    }

    /// Spawns the engine task; the configuration must already be validated
    pub(crate) fn start(
        fetcher: Arc<dyn PageFetcher>,
        device: Arc<dyn DeviceIdentity>,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn AsyncSpawner>,
        config: CacheConfig,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let outputs = Arc::new(Outputs {
            geofences: Observable::with_value(GeofenceMap::default()),
            added: Observable::new(),
            diagnostics: Observable::with_value(Vec::new()),
            loading: Observable::with_value(false),
            failures: Observable::new(),
            stats: StatsCounters::default(),
        });

        let engine = Engine {
            index: TileIndex::new(),
            local: HashMap::default(),
            listing: PageCache::default(),
            outputs: outputs.clone(),
            fetcher: fetcher.clone(),
            device: device.clone(),
            clock,
            spawner: spawner.clone(),
            commands: commands.downgrade(),
            max_pages: config.loading.max_pages_per_tile,
            idle_waiters: Vec::new(),
            loading: false,
        };
        let handle: Arc<dyn AsyncHandle> = Arc::from(spawn(spawner.as_ref(), engine.run(receiver)));

        Self {
            commands,
            outputs,
            fetcher,
            device,
            spawner,
            config: Arc::new(config),
            engine: handle,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Makes sure a tile is loaded or loading. Completed and loading tiles
    /// are left alone; empty and failed tiles start a fetch.
    pub fn ensure_loaded(&self, tile: TileKey) -> Result<()> {
        self.send(Command::Ensure(vec![tile]))
    }

    /// [`ensure_loaded`](Self::ensure_loaded) for several tiles at once
    pub fn ensure_all(&self, tiles: Vec<TileKey>) -> Result<()> {
        self.send(Command::Ensure(tiles))
    }

    /// Re-fetches a tile even if it completed. Its previous records stay
    /// published until the new fetch completes, and survive if it fails.
    pub fn refresh(&self, tile: TileKey) -> Result<()> {
        self.send(Command::Refresh(tile))
    }

    /// Resets every tile to empty and clears the published collection.
    /// Results of fetches still in flight are discarded when they arrive.
    pub fn invalidate_all(&self) -> Result<()> {
        self.send(Command::InvalidateAll)
    }

    /// Adds locally created geofences; they are published right away,
    /// listed ahead of the first cached page, and dropped by the next
    /// invalidation
    pub fn insert_geofences(&self, records: Vec<Geofence>) -> Result<()> {
        self.send(Command::Insert(records))
    }

    /// Re-filters the published collection for the current device identity
    pub fn device_changed(&self) -> Result<()> {
        self.send(Command::DeviceChanged)
    }

    /// A geofence from the published collection, or fetched by id and then
    /// inserted into the cache. A fetch that straddles an invalidation is
    /// returned to the caller but not inserted.
    pub async fn get_geofence(&self, id: &GeofenceId) -> Result<Arc<Geofence>> {
        if let Some(cached) = self.outputs.geofences.get().and_then(|map| map.get(id).cloned()) {
            return Ok(cached);
        }

        let generation = self.generation().await?;
        let fetched = self.fetcher.fetch_geofence(id).await?;
        let filtered = Arc::new(filter_for_device(&fetched, &self.device.device_id()));
        self.send(Command::Fetched {
            record: fetched,
            generation,
        })?;
        Ok(filtered)
    }

    /// One page of the device-wide listing. Pages are cached by token until
    /// the next invalidation, and concurrent requests for the same token
    /// share one fetch.
    pub async fn load_page(&self, token: Option<PageToken>) -> Result<GeofencePage> {
        let (reply, response) = oneshot::channel();
        self.send(Command::LoadPage { token, reply })?;
        Ok(response.await.map_err(|_| Error::Closed)??)
    }

    async fn generation(&self) -> Result<u64> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Generation(reply))?;
        response.await.map_err(|_| Error::Closed)
    }

    /// Current state of one tile, records included
    pub async fn tile_state(&self, tile: &TileKey) -> Result<TileState> {
        let (reply, response) = oneshot::channel();
        self.send(Command::TileState(tile.clone(), reply))?;
        response.await.map_err(|_| Error::Closed)
    }

    /// Latest diagnostic projection of every tile
    pub fn tile_states(&self) -> Arc<Vec<TileSnapshot>> {
        self.outputs.diagnostics.get().unwrap_or_default()
    }

    /// Resolves once no tile is loading
    pub async fn wait_idle(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::WaitIdle(reply))?;
        response.await.map_err(|_| Error::Closed)
    }

    /// Whether a circular geofence at `center` would overlap one already
    /// published
    pub fn has_adjacent_geofence(&self, center: &LatLng, radius_m: u32) -> Result<bool> {
        let published = self.outputs.geofences.get().unwrap_or_default();
        has_adjacent(center, radius_m as f64, published.values().map(|g| g.as_ref()))
    }

    /// [`has_adjacent_geofence`](Self::has_adjacent_geofence) after loading
    /// the tile around `center` and its neighbours. Fails if any of them
    /// could not be loaded.
    pub async fn has_adjacent_geofence_loaded(&self, center: &LatLng, radius_m: u32) -> Result<bool> {
        let home = TileKey::from_lat_lng(center, DEFAULT_PRECISION)?;
        let mut area = home.neighbors()?;
        area.push(home);
        self.ensure_all(area.clone())?;
        self.wait_idle().await?;

        for tile in &area {
            if let TileState::Error { cause } = self.tile_state(tile).await? {
                return Err(Error::Fetch(cause));
            }
        }
        self.has_adjacent_geofence(center, radius_m)
    }

    pub fn stats(&self) -> CacheStats {
        self.outputs.stats.snapshot()
    }

    /// Device-filtered geofences of all completed tiles plus local inserts
    pub fn geofences(&self) -> &Observable<GeofenceMap> {
        &self.outputs.geofences
    }

    /// Each batch of records as it joins the cache: a completed tile, an
    /// insert, a fetched geofence or a listing page. Filtered like
    /// [`geofences`](Self::geofences).
    pub fn added(&self) -> &Observable<Vec<Arc<Geofence>>> {
        &self.outputs.added
    }

    pub fn diagnostics(&self) -> &Observable<Vec<TileSnapshot>> {
        &self.outputs.diagnostics
    }

    /// True while any tile is loading
    pub fn loading(&self) -> &Observable<bool> {
        &self.outputs.loading
    }

    pub fn failures(&self) -> &Observable<TileFailure> {
        &self.outputs.failures
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// A viewport coordinator feeding this cache, using its viewport config
    pub fn coordinator(&self) -> ViewportCoordinator {
        ViewportCoordinator::new(
            Arc::new(self.clone()),
            self.config.viewport.clone(),
            self.spawner.as_ref(),
        )
    }

    /// Stops the engine task; later calls fail with [`Error::Closed`]
    pub fn shutdown(&self) {
        self.engine.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.engine.is_finished()
    }
}

impl TileSink for GeofenceCache {
    fn ensure_tiles(&self, tiles: Vec<TileKey>) {
        if let Err(e) = self.ensure_all(tiles) {
            log::warn!("viewport tiles dropped: {}", e);
        }
    }
}

impl fmt::Debug for GeofenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeofenceCache")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

/// State owned by the engine task
struct Engine {
    index: TileIndex,
    /// Locally inserted records, published after the tiles
    local: HashMap<GeofenceId, Geofence>,
    /// Device-wide listing pages, published between tiles and local records
    listing: PageCache,
    outputs: Arc<Outputs>,
    fetcher: Arc<dyn PageFetcher>,
    device: Arc<dyn DeviceIdentity>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn AsyncSpawner>,
    /// Weak so the engine stops once every handle and fetch is gone
    commands: mpsc::WeakUnboundedSender<Command>,
    max_pages: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
    loading: bool,
}

impl Engine {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("geofence cache engine started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        log::debug!("geofence cache engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Ensure(tiles) => {
                let now = self.clock.now();
                for tile in tiles {
                    let outcome = self.index.request(&tile, now);
                    self.apply_request(&tile, outcome);
                }
                self.publish_diagnostics();
            }
            Command::Refresh(tile) => {
                let outcome = self.index.refresh(&tile, self.clock.now());
                self.apply_request(&tile, outcome);
                self.publish_diagnostics();
            }
            Command::InvalidateAll => {
                let generation = self.index.invalidate_all();
                self.local.clear();
                self.listing.clear();
                log::debug!("cache invalidated, now at generation {}", generation);
                self.publish_geofences();
                self.publish_diagnostics();
            }
            Command::Insert(records) => {
                log::debug!("inserting {} local geofences", records.len());
                self.listing.created(&records);
                merge_records(&mut self.local, records.clone());
                self.publish_geofences();
                self.publish_added(&records);
            }
            Command::Fetched { record, generation } => {
                if generation != self.index.generation() {
                    self.outputs.stats.stale();
                    log::debug!(
                        "discarded geofence {} fetched at stale generation {}",
                        record.id,
                        generation
                    );
                } else {
                    merge_records(&mut self.local, vec![record.clone()]);
                    self.publish_geofences();
                    self.publish_added(&[record]);
                }
            }
            Command::LoadPage { token, reply } => {
                let device_id = self.device.device_id();
                if let Some(page) = self.listing.cached(&token, &device_id) {
                    let _ = reply.send(Ok(page));
                } else if self.listing.wait(token.clone(), reply) {
                    self.spawn_list_fetch(token, self.index.generation());
                }
            }
            Command::ListPageLoaded {
                token,
                generation,
                result,
            } => self.list_page_loaded(token, generation, result),
            Command::Generation(reply) => {
                let _ = reply.send(self.index.generation());
            }
            Command::DeviceChanged => self.publish_geofences(),
            Command::PageLoaded {
                tile,
                generation,
                result,
            } => self.page_loaded(tile, generation, result),
            Command::TileState(tile, reply) => {
                let _ = reply.send(self.index.state(&tile));
            }
            Command::WaitIdle(reply) => {
                if self.index.is_loading() {
                    self.idle_waiters.push(reply);
                } else {
                    let _ = reply.send(());
                }
            }
        }
        self.update_loading();
    }

    fn apply_request(&mut self, tile: &TileKey, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Start {
                request,
                generation,
            } => {
                log::debug!("tile {} loading", tile);
                self.spawn_fetch(request, generation);
            }
            RequestOutcome::Deferred => {
                log::debug!("tile {} waits for a stale fetch to return", tile);
            }
            RequestOutcome::Deduplicated => self.outputs.stats.deduplicated(),
            RequestOutcome::Cached => {}
        }
    }

    fn page_loaded(
        &mut self,
        tile: TileKey,
        generation: u64,
        result: std::result::Result<PageResult, FetchError>,
    ) {
        let now = self.clock.now();
        match self
            .index
            .page_loaded(&tile, generation, result, self.max_pages, now)
        {
            PageOutcome::Continue(request) => {
                self.outputs.stats.page_merged();
                log::debug!("tile {} continues at {:?}", tile, request.page_token);
                self.spawn_fetch(request, generation);
            }
            PageOutcome::Completed { records } => {
                self.outputs.stats.page_merged();
                self.outputs.stats.tile_completed();
                log::info!("tile {} completed with {} geofences", tile, records);
                self.publish_geofences();
                if let TileState::Completed { records, .. } = self.index.state(&tile) {
                    self.publish_added(&records);
                }
            }
            PageOutcome::Failed(cause) => {
                self.outputs.stats.failure();
                log::warn!("tile {} failed: {}", tile, cause);
                self.outputs.failures.publish(TileFailure {
                    tile: tile.clone(),
                    cause,
                    at: now,
                });
            }
            PageOutcome::Stale { restart } => {
                self.outputs.stats.stale();
                log::debug!(
                    "discarded result for tile {} from stale generation {}",
                    tile,
                    generation
                );
                if let Some((request, generation)) = restart {
                    self.spawn_fetch(request, generation);
                }
            }
        }
        self.publish_diagnostics();
    }

    fn spawn_fetch(&self, request: PageRequest, generation: u64) {
        let Some(commands) = self.commands.upgrade() else {
            log::debug!("cache dropped, not fetching tile {}", request.tile);
            return;
        };
        self.outputs.stats.fetch();

        let fetcher = self.fetcher.clone();
        let _task = spawn(self.spawner.as_ref(), async move {
            let result = AssertUnwindSafe(fetcher.fetch_page(&request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FetchError::Network("page fetcher panicked".into())));
            let _ = commands.send(Command::PageLoaded {
                tile: request.tile,
                generation,
                result,
            });
        });
    }

    fn list_page_loaded(
        &mut self,
        token: Option<PageToken>,
        generation: u64,
        result: std::result::Result<PageResult, FetchError>,
    ) {
        if generation != self.index.generation() {
            self.outputs.stats.stale();
            log::debug!("discarded listing page from stale generation {}", generation);
            if self.listing.has_waiters(&token) {
                self.spawn_list_fetch(token, self.index.generation());
            }
            return;
        }

        match &result {
            Ok(_) => self.outputs.stats.page_merged(),
            Err(cause) => {
                self.outputs.stats.failure();
                log::warn!("listing page {:?} failed: {}", token, cause);
            }
        }
        let delivery = self.listing.loaded(token, result, &self.device.device_id());
        if !delivery.added.is_empty() {
            self.publish_geofences();
            self.publish_added(&delivery.added);
        }
        delivery.deliver();
    }

    fn spawn_list_fetch(&self, token: Option<PageToken>, generation: u64) {
        let Some(commands) = self.commands.upgrade() else {
            log::debug!("cache dropped, not fetching listing page");
            return;
        };
        self.outputs.stats.fetch();

        let fetcher = self.fetcher.clone();
        let _task = spawn(self.spawner.as_ref(), async move {
            let result = AssertUnwindSafe(fetcher.fetch_list_page(token.as_ref()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FetchError::Network("page fetcher panicked".into())));
            let _ = commands.send(Command::ListPageLoaded {
                token,
                generation,
                result,
            });
        });
    }

    fn publish_added(&self, records: &[Geofence]) {
        let device_id = self.device.device_id();
        self.outputs.added.publish(
            records
                .iter()
                .map(|r| Arc::new(filter_for_device(r, &device_id)))
                .collect(),
        );
    }

    fn publish_geofences(&self) {
        let mut merged: HashMap<GeofenceId, Geofence> = HashMap::default();
        for records in self.index.completed_in_order() {
            merge_records(&mut merged, records.to_vec());
        }
        merge_records(&mut merged, self.listing.records());
        merge_records(&mut merged, self.local.values().cloned().collect());

        let device_id = self.device.device_id();
        self.outputs
            .geofences
            .publish(filter_collection(merged.iter(), &device_id));
    }

    fn publish_diagnostics(&self) {
        self.outputs.diagnostics.publish(self.index.snapshots());
    }

    fn update_loading(&mut self) {
        let loading = self.index.is_loading();
        if loading != self.loading {
            self.loading = loading;
            self.outputs.loading.publish(loading);
        }
        if !loading {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}
