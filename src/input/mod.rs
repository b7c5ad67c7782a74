pub mod coordinator;
pub mod events;

// Re-export the essential types
pub use coordinator::{TileSink, ViewportCoordinator};
pub use events::{CameraEvent, ViewportSignal};
