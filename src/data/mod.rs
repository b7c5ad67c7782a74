pub mod filter;
pub mod geofence;

pub use filter::{filter_collection, filter_for_device};
pub use geofence::{merge_records, Geofence, GeofenceId, GeofenceMap, Marker};
