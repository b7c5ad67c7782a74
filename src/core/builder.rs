//! Cache builder for fluent API configuration
//!
//! This module provides a GeofenceCacheBuilder that wires the page fetcher,
//! device identity, clock, spawner and configuration into a running
//! [`GeofenceCache`].

use crate::{
    core::config::{CacheConfig, CacheProfile},
    input::coordinator::ViewportCoordinator,
    runtime::{AsyncSpawner, TokioSpawner},
    tiles::{cache::GeofenceCache, source::PageFetcher},
    traits::{Clock, DeviceIdentity, SystemClock},
    Error, Result,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating and configuring GeofenceCache instances
pub struct GeofenceCacheBuilder {
    fetcher: Arc<dyn PageFetcher>,
    device: Arc<dyn DeviceIdentity>,
    clock: Arc<dyn Clock>,
    /// Defaults to the tokio runtime of the calling context
    spawner: Option<Arc<dyn AsyncSpawner>>,
    config: CacheConfig,
}

impl GeofenceCacheBuilder {
    /// Create a new builder with the balanced profile
    pub fn new(fetcher: Arc<dyn PageFetcher>, device: Arc<dyn DeviceIdentity>) -> Self {
        Self {
            fetcher,
            device,
            clock: Arc::new(SystemClock),
            spawner: None,
            config: CacheProfile::default().resolve(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn AsyncSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Replace the configuration with a preset
    pub fn with_profile(mut self, profile: CacheProfile) -> Self {
        self.config = profile.resolve();
        self
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_debounce(mut self, quiet: Duration) -> Self {
        self.config.viewport.debounce_ms = quiet.as_millis() as u64;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.config.viewport.max_tiles = max_tiles;
        self
    }

    pub fn with_neighbors(mut self, include: bool) -> Self {
        self.config.viewport.include_neighbors = include;
        self
    }

    pub fn with_max_pages_per_tile(mut self, pages: usize) -> Self {
        self.config.loading.max_pages_per_tile = pages;
        self
    }

    /// Validates the configuration and starts the cache engine
    pub fn build(self) -> Result<GeofenceCache> {
        self.config.validate()?;

        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(TokioSpawner::current().ok_or_else(|| {
                Error::Runtime("no tokio runtime in this context; supply a spawner".into())
            })?),
        };

        Ok(GeofenceCache::start(
            self.fetcher,
            self.device,
            self.clock,
            spawner,
            self.config,
        ))
    }

    /// Builds the cache together with a coordinator feeding it
    pub fn build_with_coordinator(self) -> Result<(GeofenceCache, ViewportCoordinator)> {
        let cache = self.build()?;
        let coordinator = cache.coordinator();
        Ok((cache, coordinator))
    }
}
