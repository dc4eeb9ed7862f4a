//! Jukebox Core - shared library for the classroom jukebox.
//!
//! Browser clients submit tracks to a streaming provider's playback queue,
//! and every client is shown one consistent view of what is playing now and
//! what comes next. The provider only offers a polled, duplicate-blind
//! snapshot of its queue, so this crate keeps per-enqueue metadata of its own
//! and reconciles the two on every tick.
//!
//! # Architecture
//!
//! - [`provider`]: Streaming provider client (Spotify Web API) behind traits
//! - [`store`]: Per-track-instance metadata and the ban list (memory or SQLite)
//! - [`services`]: Reconciler, queue facade, and ban-vote state machine
//! - [`events`]: Event system for real-time client communication
//! - [`api`]: HTTP, SSE, and WebSocket surface
//! - [`state`]: Configuration and the merged queue view
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`ProviderClient`](provider::ProviderClient): Provider reads and mutations
//! - [`JukeboxStore`](store::JukeboxStore): Metadata and ban persistence

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod provider;
pub mod runtime;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, JukeboxError, JukeboxResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter, NoopEventEmitter,
    PresenceEvent, QueueEvent, VoteEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, CurrentTrackView, QueueItem, QueueState};
pub use utils::{now_millis, validate_track_uri, TrackUriError};

// Re-export provider types
pub use provider::{ProviderClient, ProviderError, SpotifyClient, SpotifyCredentials, Track};

// Re-export store types
pub use store::{BanStore, BannedTrack, InMemoryStore, JukeboxStore, MetadataEntry, MetadataStore, SqliteStore};

// Re-export service types
pub use services::{QueueReconciler, QueueService, VoteManager};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, create_http_client, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError, WsConnectionManager};
