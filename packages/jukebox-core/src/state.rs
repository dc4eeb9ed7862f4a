//! Core configuration and the merged queue view sent to clients.
//!
//! [`Config`] holds every tunable of the library. [`QueueState`] is the
//! transient, per-tick view produced by the reconciler: provider tracks
//! paired with their stored metadata.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::PROVIDER_ATTRIBUTION;
use crate::provider::{NowPlaying, Track};
use crate::store::MetadataEntry;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the jukebox core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    /// Origins allowed by CORS (prefix match). Empty allows any origin.
    pub trusted_origins: Vec<String>,

    // Sync
    /// Interval between background reconciliation ticks (milliseconds).
    pub sync_interval_ms: u64,

    /// Upper bound on one provider read during a tick (milliseconds).
    pub provider_timeout_ms: u64,

    /// Attribution recorded on entries synthesized for unknown tracks.
    pub provider_attribution: String,

    // Votes
    /// How long a ban vote stays open (seconds).
    pub vote_duration_secs: u64,

    /// Minimum distinct online users required to start a ban vote.
    pub min_online_for_vote: usize,

    // WebSocket
    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            trusted_origins: Vec::new(),
            sync_interval_ms: 5000,
            provider_timeout_ms: 8000,
            provider_attribution: PROVIDER_ATTRIBUTION.to_string(),
            vote_duration_secs: 45,
            min_online_for_vote: 3,
            ws_heartbeat_timeout_secs: 30,
            ws_heartbeat_check_interval_secs: 1,
            event_channel_capacity: 100,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_interval_ms == 0 {
            return Err("sync_interval_ms must be >= 1".to_string());
        }
        if self.provider_timeout_ms == 0 {
            return Err("provider_timeout_ms must be >= 1".to_string());
        }
        if self.vote_duration_secs == 0 {
            return Err("vote_duration_secs must be >= 1".to_string());
        }
        if self.min_online_for_vote == 0 {
            return Err("min_online_for_vote must be >= 1".to_string());
        }
        if self.ws_heartbeat_check_interval_secs == 0 {
            return Err("ws_heartbeat_check_interval_secs must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)"
                    .to_string(),
            );
        }
        if self.provider_attribution.trim().is_empty() {
            return Err("provider_attribution must not be empty".to_string());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue View
// ─────────────────────────────────────────────────────────────────────────────

/// Requester name shown for anonymous submissions.
const ANONYMOUS_NAME: &str = "Anonymous";

/// One track position paired with the metadata row it was matched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub track: Track,
    /// Identity of the matched row, together with `track.uri`.
    pub added_at: u64,
    /// Requester, masked when the row is anonymous.
    pub added_by: String,
    pub is_anonymous: bool,
    pub shield_count: u32,
}

impl QueueItem {
    /// Pairs a track with its metadata row.
    pub fn new(track: Track, entry: &MetadataEntry) -> Self {
        let added_by = if entry.is_anonymous {
            ANONYMOUS_NAME.to_string()
        } else {
            entry.added_by.clone()
        };
        Self {
            track,
            added_at: entry.added_at,
            added_by,
            is_anonymous: entry.is_anonymous,
            shield_count: entry.shield_count,
        }
    }

    pub fn uri(&self) -> &str {
        &self.track.uri
    }
}

/// The now-playing track with its single matched row and live position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTrackView {
    #[serde(flatten)]
    pub item: QueueItem,
    pub is_playing: bool,
    pub progress_ms: u64,
}

impl CurrentTrackView {
    pub fn new(now: NowPlaying, entry: &MetadataEntry) -> Self {
        Self {
            item: QueueItem::new(now.track, entry),
            is_playing: now.is_playing,
            progress_ms: now.progress_ms,
        }
    }

    pub fn uri(&self) -> &str {
        self.item.uri()
    }
}

/// Merged state produced by one reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub current_track: Option<CurrentTrackView>,
    /// Upcoming tracks in provider order.
    pub queue: Vec<QueueItem>,
    pub is_playing: bool,
    /// Playback position of the current track (ms).
    #[serde(rename = "progress")]
    pub progress_ms: u64,
    /// Unix milliseconds of the tick that produced this state.
    pub last_update: u64,
}

impl QueueState {
    /// State before the first successful tick.
    pub fn empty(now: u64) -> Self {
        Self {
            current_track: None,
            queue: Vec::new(),
            is_playing: false,
            progress_ms: 0,
            last_update: now,
        }
    }

    pub fn current_uri(&self) -> Option<&str> {
        self.current_track.as_ref().map(CurrentTrackView::uri)
    }
}
