//! Background task spawning.
//!
//! Services that own background work (the sync loop, vote expiry timers)
//! receive a spawner instead of calling `tokio::spawn` directly, so the
//! embedding binary decides which runtime handle they land on.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Spawns detached background work.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future. The spawner keeps no handle to it.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Runs `on_expiry` once `delay` has elapsed, unless `cancel` fires first.
    ///
    /// `on_expiry` is not polled before the deadline.
    fn spawn_deadline<F>(&self, delay: Duration, cancel: CancellationToken, on_expiry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_expiry.await,
            }
        });
    }
}

/// Spawner bound to a Tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on.
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
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_once_after_delay() {
        let spawner = TokioSpawner::new(tokio::runtime::Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));
        let hit = Arc::clone(&fired);

        spawner.spawn_deadline(Duration::from_secs(45), CancellationToken::new(), async move {
            hit.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(44)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deadline_never_fires() {
        let spawner = TokioSpawner::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let hit = Arc::clone(&fired);
        let cancel = CancellationToken::new();

        spawner.spawn_deadline(Duration::from_secs(45), cancel.clone(), async move {
            hit.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
