//! Collaborator abstractions supplied to the cache at construction
//!
//! The cache never reaches for ambient state: who the current device is and
//! what time it is both come through these traits.

use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Identity of the device whose markers are shown
pub trait DeviceIdentity: Send + Sync {
    fn device_id(&self) -> String;
}

/// Source of wall-clock time for diagnostics
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Device identity held in memory; can be switched at runtime (for example
/// after a new login), followed by [`crate::GeofenceCache::device_changed`]
#[derive(Debug, Default)]
pub struct StaticDevice {
    id: RwLock<String>,
}

impl StaticDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: RwLock::new(id.into()),
        }
    }

    pub fn set_device_id(&self, id: impl Into<String>) {
        if let Ok(mut guard) = self.id.write() {
            *guard = id.into();
        }
    }
}

impl DeviceIdentity for StaticDevice {
    fn device_id(&self) -> String {
        self.id.read().map(|id| id.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_device_switch() {
        let device = StaticDevice::new("a");
        assert_eq!(device.device_id(), "a");
        device.set_device_id("b");
        assert_eq!(device.device_id(), "b");
    }
}
