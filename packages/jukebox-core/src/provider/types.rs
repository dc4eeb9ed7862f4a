//! Provider-owned domain types.

use serde::{Deserialize, Serialize};

/// A track as reported by the provider.
///
/// Immutable once observed. The same URI may occur several times in one
/// queue snapshot; each occurrence is a distinct positional entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Provider URI (`spotify:track:...`).
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Artist names in billing order.
    pub artists: Vec<String>,
    /// Track length in milliseconds.
    pub duration_ms: u64,
    /// Album artwork URL (largest available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Track {
    /// Artists joined for display ("A, B").
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// The provider's now-playing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub track: Track,
    pub is_playing: bool,
    /// Playback position within the track (ms).
    pub progress_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artist_line_joins_with_comma() {
        let track = Track {
            uri: "spotify:track:a".into(),
            name: "Song".into(),
            artists: vec!["First".into(), "Second".into()],
            duration_ms: 1000,
            image: None,
        };
        assert_eq!(track.artist_line(), "First, Second");
    }

    #[test]
    fn track_serializes_camel_case_without_missing_image() {
        let track = Track {
            uri: "spotify:track:a".into(),
            name: "Song".into(),
            artists: vec![],
            duration_ms: 1000,
            image: None,
        };
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["durationMs"], 1000);
        assert!(json.get("image").is_none());
    }
}
