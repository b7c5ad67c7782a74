//! Per-device marker view
//!
//! Cached records keep the visits of every device. What the map and list
//! screens show is a filtered copy, produced here at publication time, so a
//! change of device identity only needs a re-filter.

use crate::data::geofence::{Geofence, GeofenceId, GeofenceMap};
use crate::prelude::HashMap;
use std::sync::Arc;

/// Returns a copy of `geofence` whose markers all belong to `device_id`,
/// newest arrival first. Pure and idempotent.
pub fn filter_for_device(geofence: &Geofence, device_id: &str) -> Geofence {
    let mut markers: Vec<_> = geofence
        .markers
        .iter()
        .filter(|m| m.device_id == device_id)
        .cloned()
        .collect();
    markers.sort_by(|a, b| b.arrived_at.cmp(&a.arrived_at));

    Geofence {
        markers,
        ..geofence_without_markers(geofence)
    }
}

fn geofence_without_markers(geofence: &Geofence) -> Geofence {
    Geofence {
        id: geofence.id.clone(),
        name: geofence.name.clone(),
        address: geofence.address.clone(),
        created_at: geofence.created_at,
        center: geofence.center,
        polygon: geofence.polygon.clone(),
        radius: geofence.radius,
        metadata: geofence.metadata.clone(),
        markers: Vec::new(),
    }
}

/// Builds the published, device-filtered map from the raw merged records
pub fn filter_collection<'a, I>(records: I, device_id: &str) -> GeofenceMap
where
    I: IntoIterator<Item = (&'a GeofenceId, &'a Geofence)>,
{
    let mut published: GeofenceMap = HashMap::default();
    for (id, record) in records {
        published.insert(id.clone(), Arc::new(filter_for_device(record, device_id)));
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::LatLng;
    use crate::data::geofence::Marker;
    use chrono::{TimeZone, Utc};

    fn sample() -> Geofence {
        let at = |h| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap();
        Geofence::new("g", LatLng::new(1.0, 2.0), at(0))
            .with_marker(Marker::new("me", at(1)))
            .with_marker(Marker::new("other", at(2)))
            .with_marker(Marker::new("me", at(3)))
    }

    #[test]
    fn test_filter_keeps_only_device_markers_newest_first() {
        let filtered = filter_for_device(&sample(), "me");
        assert_eq!(filtered.markers.len(), 2);
        assert!(filtered.markers.iter().all(|m| m.device_id == "me"));
        assert!(filtered.markers[0].arrived_at > filtered.markers[1].arrived_at);
    }

    #[test]
    fn test_filter_is_idempotent_and_non_destructive() {
        let stored = sample();
        let once = filter_for_device(&stored, "me");
        let twice = filter_for_device(&once, "me");
        assert_eq!(once, twice);

        // the stored record is untouched and can be re-filtered for anyone
        assert_eq!(stored.markers.len(), 3);
        assert_eq!(filter_for_device(&stored, "other").markers.len(), 1);
        assert_eq!(filter_for_device(&stored, "me"), once);
    }

    #[test]
    fn test_filter_collection() {
        let stored = sample();
        let mut raw = HashMap::default();
        raw.insert(stored.id.clone(), stored);

        let published = filter_collection(raw.iter(), "nobody");
        assert_eq!(published.len(), 1);
        assert!(published["g"].markers.is_empty());
    }
}
