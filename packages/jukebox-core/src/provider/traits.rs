//! Trait abstractions for streaming provider operations.
//!
//! These traits enable dependency injection for testability and modularity.
//! Services depend on traits rather than concrete implementations.

use async_trait::async_trait;

use super::api::ProviderResult;
use super::types::{NowPlaying, Track};

/// Read-only view of the provider's playback state.
///
/// Used by `QueueReconciler` on every sync tick.
#[async_trait]
pub trait ProviderPlayback: Send + Sync {
    /// Returns the now-playing track, or `None` when nothing is playing.
    async fn current_track(&self) -> ProviderResult<Option<NowPlaying>>;

    /// Returns the upcoming queue in play order. Duplicates are preserved.
    async fn queue_snapshot(&self) -> ProviderResult<Vec<Track>>;
}

/// Mutations of the provider's playback queue.
///
/// Used by `QueueService`. Implementations must not retry these
/// internally: a retried enqueue after a timeout can queue a track twice.
#[async_trait]
pub trait ProviderControl: Send + Sync {
    /// Appends a track URI to the provider's queue.
    async fn enqueue(&self, uri: &str) -> ProviderResult<()>;

    /// Skips to the next track.
    async fn skip_to_next(&self) -> ProviderResult<()>;
}

/// Catalog lookups.
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    /// Resolves a track URI to its full details.
    async fn get_track(&self, uri: &str) -> ProviderResult<Track>;

    /// Searches the catalog for classroom-suitable tracks.
    ///
    /// Explicit tracks and tracks of seven minutes or more are dropped.
    async fn search(&self, query: &str) -> ProviderResult<Vec<Track>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Combined Traits (for trait objects)
// ─────────────────────────────────────────────────────────────────────────────

/// Combined trait for all provider operations.
///
/// Used by `QueueService`, which reads, mutates, and resolves tracks.
#[async_trait]
pub trait ProviderClient: ProviderPlayback + ProviderControl + ProviderCatalog {}

/// Blanket implementation for any type implementing all traits.
impl<T: ProviderPlayback + ProviderControl + ProviderCatalog> ProviderClient for T {}
