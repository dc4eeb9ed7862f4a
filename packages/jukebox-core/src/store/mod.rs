//! Persistent per-track-instance metadata and the banned-track list.
//!
//! A [`MetadataEntry`] records one enqueue event, identified by
//! `(track_uri, added_at)`. Rows that share a URI are told apart only by
//! the FIFO order of `added_at`, which every backend keeps strictly
//! increasing per URI.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Attributes of one enqueue event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub track_uri: String,
    /// Unix milliseconds. Strictly increasing per URI once stored.
    pub added_at: u64,
    pub added_by: String,
    pub is_anonymous: bool,
    pub shield_count: u32,
}

impl MetadataEntry {
    /// Creates an unshielded entry.
    pub fn new(
        track_uri: impl Into<String>,
        added_at: u64,
        added_by: impl Into<String>,
        is_anonymous: bool,
    ) -> Self {
        Self {
            track_uri: track_uri.into(),
            added_at,
            added_by: added_by.into(),
            is_anonymous,
            shield_count: 0,
        }
    }
}

/// A track removed from circulation by a passed ban vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedTrack {
    pub track_uri: String,
    pub track_name: String,
    pub track_artist: String,
    pub banned_at: u64,
    pub yes_votes: u32,
    pub no_votes: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite rejected the statement or the database is unavailable.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking worker running the query panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(String),

    /// Filesystem error while preparing the database location.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Storage of per-track-instance metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Returns every row whose URI is in `uris`, ordered by `added_at`
    /// ascending within each URI.
    async fn find_by_uris(&self, uris: &[String]) -> StoreResult<Vec<MetadataEntry>>;

    /// Stores a row and returns it as persisted.
    ///
    /// `added_at` is raised to one past the newest existing row for the
    /// same URI when needed, so insertion order is FIFO order.
    async fn insert(&self, entry: MetadataEntry) -> StoreResult<MetadataEntry>;

    /// Removes and returns the oldest row for `uri`.
    async fn delete_oldest(&self, uri: &str) -> StoreResult<Option<MetadataEntry>>;

    /// Removes one specific row. Returns whether it existed.
    async fn delete(&self, uri: &str, added_at: u64) -> StoreResult<bool>;

    /// Adds one shield to a row (the oldest for `uri` when `added_at` is
    /// `None`) and returns the updated row.
    async fn increment_shield(
        &self,
        uri: &str,
        added_at: Option<u64>,
    ) -> StoreResult<Option<MetadataEntry>>;

    /// Spends one shield if the row has any. Returns the remaining count,
    /// or `None` when nothing was spent.
    async fn consume_shield(&self, uri: &str, added_at: u64) -> StoreResult<Option<u32>>;
}

/// Storage of banned tracks.
#[async_trait]
pub trait BanStore: Send + Sync {
    async fn is_banned(&self, uri: &str) -> StoreResult<bool>;

    /// Records a ban. Re-banning a URI replaces the previous record.
    async fn insert_ban(&self, ban: BannedTrack) -> StoreResult<()>;

    /// All bans, most recent first.
    async fn list_bans(&self) -> StoreResult<Vec<BannedTrack>>;
}

/// Combined trait for backends that store both kinds of record.
pub trait JukeboxStore: MetadataStore + BanStore {}

impl<T: MetadataStore + BanStore> JukeboxStore for T {}
