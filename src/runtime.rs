//! Runtime abstraction layer for async operations
//!
//! The cache spawns its engine task and every page fetch through an
//! [`AsyncSpawner`] handed to the builder, so it never depends on a global
//! runtime. [`TokioSpawner`] is the default.

use crate::prelude::{Future, Pin};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A boxed future that can be moved to another thread
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(&self, future: BoxFuture) -> Box<dyn AsyncHandle>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Cancel the task
    fn cancel(&self);
}

/// Convenience function for spawning with type safety
pub fn spawn<F>(spawner: &dyn AsyncSpawner, future: F) -> Box<dyn AsyncHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    spawner.spawn_boxed(Box::pin(future))
}

/// Tokio-based async spawner.
///
/// Without a pinned handle it spawns onto the runtime of the calling
/// context, which must exist.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    handle: Option<Handle>,
}

impl TokioSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner bound to a specific runtime, usable from non-runtime threads
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Spawner bound to the runtime of the calling context, if there is one
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::with_handle)
    }
}

impl AsyncSpawner for TokioSpawner {
    fn spawn_boxed(&self, future: BoxFuture) -> Box<dyn AsyncHandle> {
        let handle = match &self.handle {
            Some(runtime) => runtime.spawn(future),
            None => tokio::spawn(future),
        };
        Box::new(TokioHandle(handle))
    }
}

struct TokioHandle(JoinHandle<()>);

impl AsyncHandle for TokioHandle {
    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    fn cancel(&self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tokio_spawner() {
        let spawner = TokioSpawner::new();
        let handle = spawn(&spawner, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        });

        // Should not be finished immediately
        assert!(!handle.is_finished());

        // Wait a bit and check again
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_cancel() {
        let spawner = TokioSpawner::current().unwrap();
        let handle = spawn(&spawner, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
    }
}
