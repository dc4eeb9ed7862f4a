//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the streaming provider's Web API or by the
//! wire contract with browser clients. Tunable values live in
//! [`Config`](crate::state::Config) instead.

// ─────────────────────────────────────────────────────────────────────────────
// Provider Web API
// ─────────────────────────────────────────────────────────────────────────────

/// Base URL of the provider's Web API.
pub const PROVIDER_API_BASE: &str = "https://api.spotify.com/v1";

/// Base URL of the provider's account/token service.
pub const PROVIDER_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// URI prefix for enqueueable tracks.
pub const TRACK_URI_PREFIX: &str = "spotify:track:";

/// Length of a provider track id (base62).
pub const TRACK_ID_LEN: usize = 22;

/// Refresh the access token this long before the provider says it expires (seconds).
pub const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Timeout for a single provider HTTP request (seconds).
///
/// The reconciler applies its own, usually tighter, bound on top of this.
pub const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

/// Results requested per catalog search.
pub const SEARCH_RESULT_LIMIT: u32 = 25;

/// Tracks this long or longer are left out of search results (ms).
pub const MAX_SEARCH_TRACK_DURATION_MS: u64 = 420_000;

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Attribution written on entries synthesized for tracks the store has never
/// seen (queued directly in the provider's own app).
pub const PROVIDER_ATTRIBUTION: &str = "provider";

// ─────────────────────────────────────────────────────────────────────────────
// Ban Votes
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reason when the "no" side reaches the required majority.
pub const REASON_MAJORITY_NO: &str = "majority voted no";

/// Failure reason when the remaining voters cannot carry the vote.
pub const REASON_IMPOSSIBLE: &str = "not enough votes to pass";

/// Failure reason when the expiry timer fires.
pub const REASON_EXPIRED: &str = "time expired";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "classroom-jukebox";

/// Minimum interval between repeated network-error warnings from the sync loop (ms).
pub const NETWORK_ERROR_LOG_INTERVAL_MS: u64 = 60_000;

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// First port tried when no preferred port is configured.
pub const PORT_SCAN_START: u16 = 3000;

/// Last port tried when no preferred port is configured.
pub const PORT_SCAN_END: u16 = 3010;
