//! Background task spawning for the player core.
//!
//! Players spawn follow-up work (subtitle selection after a load, OSD message
//! timers, crash recovery, playlist callbacks) through a [`TaskSpawner`]
//! injected with [`PlayerDeps`](crate::orchestrator::PlayerDeps), so the host
//! decides which runtime runs it.

use std::future::Future;

use futures::future::BoxFuture;

/// Object-safe task spawner shared by the player instances.
pub trait TaskSpawner: Send + Sync {
    /// Runs `future` to completion in the background.
    fn spawn_boxed(&self, future: BoxFuture<'static, ()>);
}

impl dyn TaskSpawner + '_ {
    /// Boxes and spawns `future`.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_boxed(Box::pin(future));
    }
}

/// Spawner backed by a Tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller runs on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn_boxed(&self, future: BoxFuture<'static, ()>) {
        self.handle.spawn(future);
    }
}
