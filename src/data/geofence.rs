//! Geofence records and the merge rules used when pages and tiles overlap

use crate::core::geo::LatLng;
use crate::prelude::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unique geofence identifier as issued by the tracking service
pub type GeofenceId = String;

/// Published collection: geofence id to record
pub type GeofenceMap = HashMap<GeofenceId, Arc<Geofence>>;

/// A recorded visit of one device to a geofence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub device_id: String,
    pub arrived_at: DateTime<Utc>,
    #[serde(default)]
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub marker_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

impl Marker {
    pub fn new(device_id: impl Into<String>, arrived_at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            arrived_at,
            exited_at: None,
            marker_id: None,
            address: None,
            duration_secs: None,
        }
    }

    pub fn with_exit(mut self, exited_at: DateTime<Utc>) -> Self {
        self.exited_at = Some(exited_at);
        self
    }

    /// Identity used to deduplicate visits across pages and tiles
    pub fn dedup_key(&self) -> (&str, DateTime<Utc>) {
        (self.device_id.as_str(), self.arrived_at)
    }
}

/// A named or address-tagged region of interest with its visit markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: GeofenceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub center: LatLng,
    /// Outer ring of a polygon geofence
    #[serde(default)]
    pub polygon: Option<Vec<LatLng>>,
    /// Radius in meters of a circular geofence
    #[serde(default)]
    pub radius: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub markers: Vec<Marker>,
}

impl Geofence {
    /// Creates a circular-or-point geofence with no markers
    pub fn new(id: impl Into<GeofenceId>, center: LatLng, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: None,
            address: None,
            created_at,
            center,
            polygon: None,
            radius: None,
            metadata: BTreeMap::new(),
            markers: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_polygon(mut self, polygon: Vec<LatLng>) -> Self {
        self.polygon = Some(polygon);
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn is_polygon(&self) -> bool {
        self.polygon.as_ref().is_some_and(|ring| ring.len() >= 3)
    }

    /// Most recent visit, if any
    pub fn last_visit(&self) -> Option<&Marker> {
        self.markers.iter().max_by_key(|m| m.arrived_at)
    }

    pub fn visits_count(&self) -> usize {
        self.markers.len()
    }

    /// Folds `newer` into `self`: non-marker fields take the newer values,
    /// markers are the union by `(device_id, arrived_at)`. A duplicate marker
    /// is replaced by its newer copy so that a later exit time wins.
    pub fn merge_from(&mut self, newer: Geofence) {
        let Geofence {
            id: _,
            name,
            address,
            created_at,
            center,
            polygon,
            radius,
            metadata,
            markers,
        } = newer;

        self.name = name;
        self.address = address;
        self.created_at = created_at;
        self.center = center;
        self.polygon = polygon;
        self.radius = radius;
        self.metadata = metadata;

        for marker in markers {
            match self
                .markers
                .iter_mut()
                .find(|existing| existing.dedup_key() == marker.dedup_key())
            {
                Some(existing) => *existing = marker,
                None => self.markers.push(marker),
            }
        }
    }
}

/// Merges a batch of records into an accumulator keyed by geofence id
pub fn merge_records(acc: &mut HashMap<GeofenceId, Geofence>, records: Vec<Geofence>) {
    for record in records {
        match acc.get_mut(&record.id) {
            Some(existing) => existing.merge_from(record),
            None => {
                acc.insert(record.id.clone(), dedup_markers(record));
            }
        }
    }
}

/// Removes duplicate markers within a single record, keeping the last copy
fn dedup_markers(mut record: Geofence) -> Geofence {
    let markers = std::mem::take(&mut record.markers);
    for marker in markers {
        match record
            .markers
            .iter_mut()
            .find(|existing| existing.dedup_key() == marker.dedup_key())
        {
            Some(existing) => *existing = marker,
            None => record.markers.push(marker),
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn fence(id: &str) -> Geofence {
        Geofence::new(id, LatLng::new(37.77, -122.41), at(0))
    }

    #[test]
    fn test_merge_overwrites_fields_and_unions_markers() {
        let mut acc = HashMap::default();
        merge_records(
            &mut acc,
            vec![fence("g").with_name("Old").with_marker(Marker::new("d1", at(1)))],
        );
        merge_records(
            &mut acc,
            vec![fence("g")
                .with_name("New")
                .with_marker(Marker::new("d1", at(1)).with_exit(at(2)))
                .with_marker(Marker::new("d1", at(3)))],
        );

        let g = &acc["g"];
        assert_eq!(g.name.as_deref(), Some("New"));
        assert_eq!(g.markers.len(), 2);
        let first = g.markers.iter().find(|m| m.arrived_at == at(1)).unwrap();
        assert_eq!(first.exited_at, Some(at(2)));
    }

    #[test]
    fn test_same_arrival_different_devices_are_distinct() {
        let mut acc = HashMap::default();
        merge_records(
            &mut acc,
            vec![fence("g")
                .with_marker(Marker::new("d1", at(1)))
                .with_marker(Marker::new("d2", at(1)))
                .with_marker(Marker::new("d1", at(1)))],
        );
        assert_eq!(acc["g"].markers.len(), 2);
    }

    #[test]
    fn test_last_visit() {
        let g = fence("g")
            .with_marker(Marker::new("d1", at(5)))
            .with_marker(Marker::new("d1", at(9)))
            .with_marker(Marker::new("d1", at(7)));
        assert_eq!(g.last_visit().map(|m| m.arrived_at), Some(at(9)));
        assert_eq!(g.visits_count(), 3);
    }
}
