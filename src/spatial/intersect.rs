//! Overlap checks between a prospective circular geofence and existing ones

use crate::core::constants::{ADJACENCY_PRECISION, EDGE_SAMPLE_SPACING_M};
use crate::core::geo::LatLng;
use crate::core::geohash::TileKey;
use crate::data::geofence::Geofence;
use crate::prelude::HashSet;
use crate::Result;
use geo::{Contains, Coord, LineString, Point, Polygon};

/// True if two circles (meters) touch or overlap
pub fn circles_intersect(c1: &LatLng, r1: f64, c2: &LatLng, r2: f64) -> bool {
    c1.distance_to(c2) <= r1 + r2
}

/// True if `point` lies inside the ring (closed implicitly)
pub fn polygon_contains(ring: &[LatLng], point: &LatLng) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let coords: Vec<Coord> = ring
        .iter()
        .map(|p| Coord { x: p.lng, y: p.lat })
        .collect();
    let polygon = Polygon::new(LineString::from(coords), vec![]);
    polygon.contains(&Point::new(point.lng, point.lat))
}

/// True if a circle touches or overlaps a polygon: the center is inside, or
/// some point sampled along the polygon edges is within the radius
pub fn circle_polygon_intersect(center: &LatLng, radius: f64, ring: &[LatLng]) -> bool {
    if polygon_contains(ring, center) {
        return true;
    }
    edge_samples(ring).any(|p| p.distance_to(center) <= radius)
}

/// Points every [`EDGE_SAMPLE_SPACING_M`] along each edge, closing edge included
fn edge_samples(ring: &[LatLng]) -> impl Iterator<Item = LatLng> + '_ {
    let closing = ring.last().zip(ring.first()).filter(|_| ring.len() > 2);
    ring.windows(2)
        .map(|pair| (pair[0], pair[1]))
        .chain(closing.map(|(a, b)| (*a, *b)))
        .flat_map(|(a, b)| {
            let steps = (a.distance_to(&b) / EDGE_SAMPLE_SPACING_M).ceil().max(1.0) as usize;
            (0..=steps).map(move |i| a.interpolate(&b, i as f64 / steps as f64))
        })
}

/// Whether a circular geofence at `center` with `radius` meters would
/// overlap any of `geofences`.
///
/// Only geofences whose center cell at the adjacency precision is the same
/// as, or neighbours, the new center's cell are examined.
pub fn has_adjacent<'a, I>(center: &LatLng, radius: f64, geofences: I) -> Result<bool>
where
    I: IntoIterator<Item = &'a Geofence>,
{
    let home = TileKey::from_lat_lng(center, ADJACENCY_PRECISION)?;
    let mut area: HashSet<TileKey> = home.neighbors()?.into_iter().collect();
    area.insert(home);

    for geofence in geofences {
        let Ok(cell) = TileKey::from_lat_lng(&geofence.center, ADJACENCY_PRECISION) else {
            log::debug!("skipping geofence {} with invalid center", geofence.id);
            continue;
        };
        if !area.contains(&cell) {
            continue;
        }

        let overlaps = match geofence.polygon.as_deref() {
            Some(ring) if geofence.is_polygon() => circle_polygon_intersect(center, radius, ring),
            _ => circles_intersect(
                center,
                radius,
                &geofence.center,
                geofence.radius.unwrap_or(0) as f64,
            ),
        };
        if overlaps {
            log::debug!("new geofence would overlap {}", geofence.id);
            return Ok(true);
        }
    }
    Ok(false)
}
