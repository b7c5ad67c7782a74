//! Geohash tile keys
//!
//! The tracking service buckets geofences by geohash cell, so the cache uses
//! the same cells as its unit of granularity. A [`TileKey`] is a validated
//! geohash string; its bounding box is decoded once at construction.

use crate::core::geo::{LatLng, LatLngBounds};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Longest geohash the key type accepts
pub const MAX_PRECISION: usize = 12;

/// Bounding box of a tile; [`LatLngBounds::corners`] yields its four corners
pub type TileBounds = LatLngBounds;

/// A geohash cell used as the unit of cache granularity.
///
/// Equality, ordering and hashing only consider the hash string.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileKey {
    hash: String,
    bounds: LatLngBounds,
}

impl TileKey {
    /// Parses and validates a geohash string
    pub fn new(hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into().to_ascii_lowercase();
        if hash.is_empty() || hash.len() > MAX_PRECISION {
            return Err(Error::InvalidTileKey(format!(
                "geohash length must be 1..={}, got {:?}",
                MAX_PRECISION, hash
            )));
        }

        let rect = geohash::decode_bbox(&hash)
            .map_err(|e| Error::InvalidTileKey(format!("{}: {}", hash, e)))?;
        let bounds = LatLngBounds::from_coords(rect.min().y, rect.min().x, rect.max().y, rect.max().x);

        Ok(Self { hash, bounds })
    }

    /// Key of the cell containing `lat_lng` at the given precision
    pub fn from_lat_lng(lat_lng: &LatLng, precision: usize) -> Result<Self> {
        if !lat_lng.is_valid() {
            return Err(Error::InvalidCoordinates(format!(
                "{}, {}",
                lat_lng.lat, lat_lng.lng
            )));
        }
        if precision == 0 || precision > MAX_PRECISION {
            return Err(Error::InvalidTileKey(format!(
                "precision must be 1..={}, got {}",
                MAX_PRECISION, precision
            )));
        }

        let coord = geo_types::Coord {
            x: lat_lng.lng,
            y: lat_lng.lat,
        };
        let hash = geohash::encode(coord, precision)
            .map_err(|e| Error::InvalidCoordinates(e.to_string()))?;
        Self::new(hash)
    }

    /// The geohash string
    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// Number of geohash characters
    pub fn precision(&self) -> usize {
        self.hash.len()
    }

    /// Bounding box of the cell
    pub fn bounds(&self) -> LatLngBounds {
        self.bounds
    }

    /// Center of the cell
    pub fn center(&self) -> LatLng {
        self.bounds.center()
    }

    /// The eight adjacent cells at the same precision
    pub fn neighbors(&self) -> Result<Vec<TileKey>> {
        let n = geohash::neighbors(&self.hash)
            .map_err(|e| Error::InvalidTileKey(format!("{}: {}", self.hash, e)))?;
        [n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw]
            .into_iter()
            .map(TileKey::new)
            .collect()
    }

    /// True if `other` is this cell or one of its neighbours
    pub fn is_adjacent_or_same(&self, other: &TileKey) -> bool {
        if self == other {
            return true;
        }
        self.neighbors()
            .map(|keys| keys.contains(other))
            .unwrap_or(false)
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for TileKey {}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileKey({})", self.hash)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

impl TryFrom<String> for TileKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        TileKey::new(value)
    }
}

impl From<TileKey> for String {
    fn from(key: TileKey) -> Self {
        key.hash
    }
}

/// Cell dimensions `(lat_degrees, lng_degrees)` at a precision
pub fn cell_size(precision: usize) -> (f64, f64) {
    let (lat_bits, lng_bits) = bit_split(precision);
    (
        180.0 / 2_f64.powi(lat_bits as i32),
        360.0 / 2_f64.powi(lng_bits as i32),
    )
}

fn bit_split(precision: usize) -> (u32, u32) {
    let bits = 5 * precision as u32;
    (bits / 2, bits.div_ceil(2))
}

/// Row/column index ranges of the cells covering `bounds`
#[derive(Debug, Clone, PartialEq)]
struct CellGrid {
    rows: (i64, i64),
    columns: Vec<(i64, i64)>,
    lat_step: f64,
    lng_step: f64,
}

impl CellGrid {
    fn new(bounds: &LatLngBounds, precision: usize) -> Self {
        let (lat_bits, lng_bits) = bit_split(precision);
        let (lat_step, lng_step) = cell_size(precision);
        let total_rows = 1_i64 << lat_bits;
        let total_cols = 1_i64 << lng_bits;

        let row_of = |lat: f64| (((lat.clamp(-90.0, 90.0) + 90.0) / lat_step).floor() as i64).clamp(0, total_rows - 1);
        let col_of = |lng: f64| (((lng + 180.0) / lng_step).floor() as i64).clamp(0, total_cols - 1);

        let south = bounds.south_west.lat.min(bounds.north_east.lat);
        let north = bounds.south_west.lat.max(bounds.north_east.lat);
        let rows = (row_of(south), row_of(north));

        let west = bounds.south_west.lng;
        let east = bounds.north_east.lng;
        let columns = if east - west >= 360.0 {
            vec![(0, total_cols - 1)]
        } else {
            let (w, e) = (LatLng::wrap_lng(west), LatLng::wrap_lng(east));
            if w <= e {
                vec![(col_of(w), col_of(e))]
            } else {
                // crosses the antimeridian
                vec![(col_of(w), total_cols - 1), (0, col_of(e))]
            }
        };

        Self {
            rows,
            columns,
            lat_step,
            lng_step,
        }
    }

    fn len(&self) -> usize {
        let rows = (self.rows.1 - self.rows.0 + 1).max(0) as usize;
        self.columns
            .iter()
            .map(|(from, to)| (to - from + 1).max(0) as usize)
            .sum::<usize>()
            .saturating_mul(rows)
    }
}

/// Number of cells of `precision` needed to cover `bounds`, without
/// enumerating them.
pub fn covering_len(bounds: &LatLngBounds, precision: usize) -> usize {
    CellGrid::new(bounds, precision.clamp(1, MAX_PRECISION)).len()
}

/// All cells of `precision` intersecting `bounds`, in row-major order from
/// the south-west corner.
pub fn covering(bounds: &LatLngBounds, precision: usize) -> Result<Vec<TileKey>> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(Error::InvalidTileKey(format!(
            "precision must be 1..={}, got {}",
            MAX_PRECISION, precision
        )));
    }

    let grid = CellGrid::new(bounds, precision);
    let mut keys = Vec::with_capacity(grid.len());
    for row in grid.rows.0..=grid.rows.1 {
        let lat = -90.0 + (row as f64 + 0.5) * grid.lat_step;
        for (from, to) in &grid.columns {
            for col in *from..=*to {
                let lng = -180.0 + (col as f64 + 0.5) * grid.lng_step;
                keys.push(TileKey::from_lat_lng(&LatLng::new(lat, lng), precision)?);
            }
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_key_validation() {
        assert!(TileKey::new("9q8y").is_ok());
        assert!(TileKey::new("").is_err());
        assert!(TileKey::new("9q8yyk8ytpxr0").is_err());
        // 'a' is not in the geohash alphabet
        assert!(TileKey::new("9qa").is_err());
        assert_eq!(TileKey::new("9Q8Y").unwrap().as_str(), "9q8y");
    }

    #[test]
    fn test_tile_key_from_lat_lng() {
        let sf = LatLng::new(37.7749, -122.4194);
        let key = TileKey::from_lat_lng(&sf, 4).unwrap();
        assert_eq!(key.as_str(), "9q8y");
        assert_eq!(key.precision(), 4);
        assert!(key.bounds().contains(&sf));
    }

    #[test]
    fn test_neighbors_surround_cell() {
        let key = TileKey::new("9q8y").unwrap();
        let neighbors = key.neighbors().unwrap();
        assert_eq!(neighbors.len(), 8);
        assert!(!neighbors.contains(&key));
        for n in &neighbors {
            assert!(key.is_adjacent_or_same(n));
            assert!(key.center().distance_to(&n.center()) < 60_000.0);
        }
    }

    #[test]
    fn test_cell_size() {
        let (lat, lng) = cell_size(1);
        assert_eq!(lat, 45.0);
        assert_eq!(lng, 45.0);
        let (lat, lng) = cell_size(4);
        assert!((lat - 0.17578125).abs() < 1e-12);
        assert!((lng - 0.3515625).abs() < 1e-12);
    }

    #[test]
    fn test_covering_single_cell() {
        let key = TileKey::new("9q8y").unwrap();
        let inner = key.bounds();
        let shrunk = LatLngBounds::from_coords(
            inner.south_west.lat + 0.01,
            inner.south_west.lng + 0.01,
            inner.north_east.lat - 0.01,
            inner.north_east.lng - 0.01,
        );
        assert_eq!(covering_len(&shrunk, 4), 1);
        assert_eq!(covering(&shrunk, 4).unwrap(), vec![key]);
    }

    #[test]
    fn test_covering_spans_neighbors() {
        let key = TileKey::new("9q8y").unwrap();
        let c = key.center();
        let (h, w) = cell_size(4);
        let bounds = LatLngBounds::from_coords(c.lat - h, c.lng - w, c.lat + h, c.lng + w);

        let keys = covering(&bounds, 4).unwrap();
        assert_eq!(keys.len(), 9);
        assert_eq!(covering_len(&bounds, 4), 9);
        assert!(keys.contains(&key));
        for n in key.neighbors().unwrap() {
            assert!(keys.contains(&n), "missing neighbour {}", n);
        }
    }

    #[test]
    fn test_covering_crosses_antimeridian() {
        let bounds = LatLngBounds::from_coords(-1.0, 179.0, 1.0, 181.0);
        let keys = covering(&bounds, 2).unwrap();
        assert!(keys.iter().any(|k| k.center().lng > 0.0));
        assert!(keys.iter().any(|k| k.center().lng < 0.0));
        assert_eq!(keys.len(), covering_len(&bounds, 2));
    }
}
