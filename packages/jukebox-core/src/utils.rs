//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::protocol_constants::{TRACK_ID_LEN, TRACK_URI_PREFIX};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Track URI Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Reasons a track URI is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackUriError {
    #[error("Track URI is empty")]
    Empty,
    #[error("Track URI must start with 'spotify:track:'")]
    WrongScheme,
    #[error("Track id must be 22 alphanumeric characters")]
    MalformedId,
}

/// Validates a provider track URI and returns the bare track id.
///
/// Accepts exactly `spotify:track:` followed by 22 ASCII alphanumerics,
/// which is the only form the provider's enqueue endpoint accepts.
pub fn validate_track_uri(uri: &str) -> Result<&str, TrackUriError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(TrackUriError::Empty);
    }
    let id = uri
        .strip_prefix(TRACK_URI_PREFIX)
        .ok_or(TrackUriError::WrongScheme)?;
    if id.len() != TRACK_ID_LEN || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TrackUriError::MalformedId);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn valid_track_uri_returns_id() {
        let id = validate_track_uri("spotify:track:4uLU6hMCjMI75M1A2tKUQC").unwrap();
        assert_eq!(id, "4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert!(validate_track_uri("  spotify:track:4uLU6hMCjMI75M1A2tKUQC ").is_ok());
    }

    #[test]
    fn empty_uri_rejected() {
        assert_eq!(validate_track_uri("   "), Err(TrackUriError::Empty));
    }

    #[test]
    fn album_uri_rejected() {
        assert_eq!(
            validate_track_uri("spotify:album:4uLU6hMCjMI75M1A2tKUQC"),
            Err(TrackUriError::WrongScheme)
        );
    }

    #[test]
    fn short_id_rejected() {
        assert_eq!(
            validate_track_uri("spotify:track:abc"),
            Err(TrackUriError::MalformedId)
        );
    }

    #[test]
    fn non_alphanumeric_id_rejected() {
        assert_eq!(
            validate_track_uri("spotify:track:4uLU6hMCjMI75M1A2tKU-C"),
            Err(TrackUriError::MalformedId)
        );
    }
}
