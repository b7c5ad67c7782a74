pub mod cache;
#[cfg(feature = "http")]
pub mod http;
pub mod index;
pub mod listing;
pub mod source;
pub mod stats;

// Re-exports for convenience
pub use cache::{GeofenceCache, TileFailure};
pub use index::{TileIndex, TileSnapshot, TileState, TileStatus};
pub use listing::GeofencePage;
pub use source::{FetchError, PageFetcher, PageRequest, PageResult, PageToken};
pub use stats::CacheStats;
