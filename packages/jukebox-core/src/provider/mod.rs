//! Streaming provider access.
//!
//! The provider owns the real playback queue. This module wraps its Web API
//! behind small traits so the reconciler and the queue service can be tested
//! against in-memory fakes.
//!
//! # Module Structure
//!
//! - `types` - Provider-owned domain types ([`Track`], [`NowPlaying`])
//! - `traits` - Trait abstractions for reads, mutations, and catalog lookups
//! - `api` - Low-level HTTP transport, token renewal, and error mapping
//! - `client` - [`SpotifyClient`] concrete trait implementation
//! - `retry` - Backoff for transient failures on idempotent reads

pub mod api;
pub mod client;
pub(crate) mod retry;
pub mod traits;
pub mod types;

// Re-export domain types
pub use types::{NowPlaying, Track};

// Re-export trait abstractions
pub use traits::{ProviderCatalog, ProviderClient, ProviderControl, ProviderPlayback};

// Re-export transport types
pub use api::{ProviderError, ProviderResult, SpotifyCredentials};

// Re-export concrete implementation
pub use client::SpotifyClient;
