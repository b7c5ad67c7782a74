//! Engine counters, readable from any thread

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls made to the page fetcher
    pub fetch_calls: u64,
    pub pages_merged: u64,
    pub tiles_completed: u64,
    pub failures: u64,
    /// Results that arrived for an invalidated generation
    pub stale_discarded: u64,
    /// `ensure_loaded` calls absorbed by an in-flight fetch
    pub deduplicated_requests: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    fetch_calls: AtomicU64,
    pages_merged: AtomicU64,
    tiles_completed: AtomicU64,
    failures: AtomicU64,
    stale_discarded: AtomicU64,
    deduplicated_requests: AtomicU64,
}

impl StatsCounters {
    pub fn fetch(&self) {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_merged(&self) {
        self.pages_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_completed(&self) {
        self.tiles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deduplicated(&self) {
        self.deduplicated_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            fetch_calls: self.fetch_calls.load(Ordering::Relaxed),
            pages_merged: self.pages_merged.load(Ordering::Relaxed),
            tiles_completed: self.tiles_completed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            deduplicated_requests: self.deduplicated_requests.load(Ordering::Relaxed),
        }
    }
}
