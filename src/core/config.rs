//! Configuration system for viewport coverage and tile loading
//!
//! This module provides a hierarchical configuration that can be picked from
//! presets or decoded from JSON. Every configuration is checked with
//! [`CacheConfig::validate`] before a cache is built from it.

use crate::core::constants::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_PAGES_PER_TILE, DEFAULT_MAX_TILES, DEFAULT_PRECISION,
    DEFAULT_VIEWPORT_SIZE,
};
use crate::core::geo::Point;
use crate::core::geohash::MAX_PRECISION;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CacheProfile {
    #[default]
    Balanced,
    /// Fewer, coarser requests for metered connections
    LowData,
    /// Finer tiles for areas with many geofences
    Dense,
    Custom(CacheConfig),
}

impl CacheProfile {
    pub fn resolve(&self) -> CacheConfig {
        match self {
            Self::Balanced => CacheConfig {
                viewport: ViewportConfig {
                    debounce_ms: DEFAULT_DEBOUNCE_MS,
                    max_tiles: DEFAULT_MAX_TILES,
                    precision_steps: vec![
                        PrecisionStep::new(0.0, 2),
                        PrecisionStep::new(7.0, 3),
                        PrecisionStep::new(10.0, DEFAULT_PRECISION),
                        PrecisionStep::new(15.0, 5),
                    ],
                    default_size: Point::new(DEFAULT_VIEWPORT_SIZE.0, DEFAULT_VIEWPORT_SIZE.1),
                    include_neighbors: true,
                },
                loading: LoadingConfig {
                    max_pages_per_tile: DEFAULT_MAX_PAGES_PER_TILE,
                },
            },
            Self::LowData => CacheConfig {
                viewport: ViewportConfig {
                    debounce_ms: 600,
                    max_tiles: 16,
                    precision_steps: vec![
                        PrecisionStep::new(0.0, 2),
                        PrecisionStep::new(8.0, 3),
                        PrecisionStep::new(12.0, DEFAULT_PRECISION),
                    ],
                    default_size: Point::new(DEFAULT_VIEWPORT_SIZE.0, DEFAULT_VIEWPORT_SIZE.1),
                    include_neighbors: false,
                },
                loading: LoadingConfig {
                    max_pages_per_tile: 20,
                },
            },
            Self::Dense => CacheConfig {
                viewport: ViewportConfig {
                    debounce_ms: 200,
                    max_tiles: 64,
                    precision_steps: vec![
                        PrecisionStep::new(0.0, 3),
                        PrecisionStep::new(9.0, DEFAULT_PRECISION),
                        PrecisionStep::new(13.0, 5),
                        PrecisionStep::new(17.0, 6),
                    ],
                    default_size: Point::new(DEFAULT_VIEWPORT_SIZE.0, DEFAULT_VIEWPORT_SIZE.1),
                    include_neighbors: true,
                },
                loading: LoadingConfig {
                    max_pages_per_tile: 100,
                },
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

/// Complete cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub viewport: ViewportConfig,
    pub loading: LoadingConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheProfile::default().resolve()
    }
}

impl CacheConfig {
    /// Decodes a configuration from JSON; missing fields take the balanced defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.viewport.validate()?;
        self.loading.validate()
    }
}

/// Zoom level from which a geohash precision applies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionStep {
    pub min_zoom: f64,
    pub precision: usize,
}

impl PrecisionStep {
    pub fn new(min_zoom: f64, precision: usize) -> Self {
        Self {
            min_zoom,
            precision,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Quiet window before a camera event is acted on
    pub debounce_ms: u64,
    /// Covering sets larger than this produce a zoom-in signal instead of loads
    pub max_tiles: usize,
    /// Ascending by `min_zoom`
    pub precision_steps: Vec<PrecisionStep>,
    /// Viewport size in pixels when an event carries none
    pub default_size: Point,
    /// Also load the eight cells around the center cell
    pub include_neighbors: bool,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        CacheProfile::Balanced.resolve().viewport
    }
}

impl ViewportConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Geohash precision for a zoom level; zooms below the first step use
    /// the first step's precision
    pub fn precision_for_zoom(&self, zoom: f64) -> usize {
        self.precision_steps
            .iter()
            .take_while(|step| step.min_zoom <= zoom)
            .last()
            .or_else(|| self.precision_steps.first())
            .map(|step| step.precision)
            .unwrap_or(DEFAULT_PRECISION)
    }

    fn validate(&self) -> Result<()> {
        if self.max_tiles == 0 {
            return Err(Error::Config("viewport.max_tiles must be positive".into()));
        }
        if self.precision_steps.is_empty() {
            return Err(Error::Config(
                "viewport.precision_steps must not be empty".into(),
            ));
        }
        for step in &self.precision_steps {
            if step.precision == 0 || step.precision > MAX_PRECISION {
                return Err(Error::Config(format!(
                    "precision {} out of range 1..={}",
                    step.precision, MAX_PRECISION
                )));
            }
            if !step.min_zoom.is_finite() {
                return Err(Error::Config("precision step zoom must be finite".into()));
            }
        }
        if self
            .precision_steps
            .windows(2)
            .any(|pair| pair[0].min_zoom >= pair[1].min_zoom)
        {
            return Err(Error::Config(
                "viewport.precision_steps must be ascending by min_zoom".into(),
            ));
        }
        if !(self.default_size.x > 0.0 && self.default_size.y > 0.0) {
            return Err(Error::Config(
                "viewport.default_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingConfig {
    /// A tile still returning continuation tokens after this many pages fails
    pub max_pages_per_tile: usize,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            max_pages_per_tile: DEFAULT_MAX_PAGES_PER_TILE,
        }
    }
}

impl LoadingConfig {
    fn validate(&self) -> Result<()> {
        if self.max_pages_per_tile == 0 {
            return Err(Error::Config(
                "loading.max_pages_per_tile must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_valid() {
        for profile in [CacheProfile::Balanced, CacheProfile::LowData, CacheProfile::Dense] {
            assert!(profile.resolve().validate().is_ok(), "{:?}", profile);
        }
    }

    #[test]
    fn test_precision_for_zoom() {
        let config = ViewportConfig::default();
        assert_eq!(config.precision_for_zoom(-1.0), 2);
        assert_eq!(config.precision_for_zoom(3.0), 2);
        assert_eq!(config.precision_for_zoom(7.0), 3);
        assert_eq!(config.precision_for_zoom(12.5), 4);
        assert_eq!(config.precision_for_zoom(18.0), 5);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            CacheConfig::from_json_str(r#"{ "viewport": { "max_tiles": 9 } }"#).unwrap();
        assert_eq!(config.viewport.max_tiles, 9);
        assert_eq!(config.viewport.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.loading, LoadingConfig::default());
    }

    #[test]
    fn test_json_round_trip() {
        let config = CacheProfile::Dense.resolve();
        let json = config.to_json_string().unwrap();
        assert_eq!(CacheConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            CacheConfig::from_json_str(r#"{ "loading": { "max_pages_per_tile": 0 } }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_json_str("not json"),
            Err(Error::Serialization(_))
        ));

        let mut config = CacheConfig::default();
        config.viewport.precision_steps = vec![PrecisionStep::new(5.0, 4), PrecisionStep::new(2.0, 5)];
        assert!(config.validate().is_err());

        config.viewport.precision_steps = vec![PrecisionStep::new(0.0, 13)];
        assert!(config.validate().is_err());
    }
}
