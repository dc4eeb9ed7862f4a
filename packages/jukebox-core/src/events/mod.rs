//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for WebSocket and SSE transport
//! - Event types for the queue, ban votes, and presence

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::services::vote_manager::VoteSummary;
use crate::state::{CurrentTrackView, QueueItem, QueueState};

/// Events broadcast to clients.
///
/// This enum categorizes all real-time events that can be sent to connected
/// clients. Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Queue and now-playing changes.
    Queue(QueueEvent),

    /// Ban vote lifecycle.
    Vote(VoteEvent),

    /// Connected-user presence.
    Presence(PresenceEvent),
}

impl BroadcastEvent {
    /// Wire name of the inner event (`queueUpdate`, `banVotePassed`, ...).
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Queue(e) => match e {
                QueueEvent::QueueUpdate(_) => "queueUpdate",
                QueueEvent::CurrentTrack { .. } => "currentTrack",
                QueueEvent::QueueAdd { .. } => "queueAdd",
                QueueEvent::Skip { .. } => "skip",
                QueueEvent::SkipBlocked { .. } => "skipBlocked",
            },
            Self::Vote(e) => match e {
                VoteEvent::BanVoteStarted(_) => "banVoteStarted",
                VoteEvent::BanVoteUpdate { .. } => "banVoteUpdate",
                VoteEvent::BanVotePassed { .. } => "banVotePassed",
                VoteEvent::BanVoteFailed { .. } => "banVoteFailed",
                VoteEvent::BanVoteError { .. } => "banVoteError",
            },
            Self::Presence(PresenceEvent::UserCount { .. }) => "userCount",
        }
    }
}

/// Events describing the shared queue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    /// Queue and current track from one reconciliation tick.
    QueueUpdate(QueueState),

    /// The now-playing track changed.
    CurrentTrack {
        /// New current track, or `None` when playback stopped.
        track: Option<CurrentTrackView>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// A track was queued by a user.
    QueueAdd {
        /// The newly queued item.
        track: QueueItem,
        /// Upcoming queue after the addition.
        queue: Vec<QueueItem>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// A skip was issued.
    Skip {
        #[serde(rename = "currentTrack")]
        current_track: Option<CurrentTrackView>,
        queue: Vec<QueueItem>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// A skip was refused because the current track was shielded.
    SkipBlocked {
        /// The track that kept playing.
        track: QueueItem,
        /// Shields left after this refusal.
        #[serde(rename = "shieldsRemaining")]
        shields_remaining: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events describing ban votes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VoteEvent {
    /// A vote opened.
    BanVoteStarted(VoteSummary),

    /// Live tallies after a ballot that did not decide the vote.
    BanVoteUpdate {
        #[serde(rename = "voteId")]
        vote_id: String,
        #[serde(rename = "trackName")]
        track_name: String,
        #[serde(rename = "yesVotes")]
        yes_votes: u32,
        #[serde(rename = "noVotes")]
        no_votes: u32,
        #[serde(rename = "onlineCount")]
        online_count: u32,
        #[serde(rename = "requiredVotes")]
        required_votes: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// The vote passed and the track is now banned.
    BanVotePassed {
        #[serde(rename = "voteId")]
        vote_id: String,
        #[serde(rename = "trackUri")]
        track_uri: String,
        #[serde(rename = "trackName")]
        track_name: String,
        #[serde(rename = "trackArtist")]
        track_artist: String,
        #[serde(rename = "yesVotes")]
        yes_votes: u32,
        #[serde(rename = "noVotes")]
        no_votes: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// The vote failed (majority no, impossible to pass, or expired).
    BanVoteFailed {
        #[serde(rename = "voteId")]
        vote_id: String,
        #[serde(rename = "trackName")]
        track_name: String,
        #[serde(rename = "yesVotes")]
        yes_votes: u32,
        #[serde(rename = "noVotes")]
        no_votes: u32,
        /// Human-readable failure reason.
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// A vote request was rejected. Sent to the requesting client only.
    BanVoteError {
        /// Machine-readable error code.
        code: &'static str,
        message: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events describing who is connected.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceEvent {
    /// Number of distinct identified users changed.
    UserCount {
        count: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// From implementations for converting inner events to BroadcastEvent
impl From<QueueEvent> for BroadcastEvent {
    fn from(event: QueueEvent) -> Self {
        BroadcastEvent::Queue(event)
    }
}

impl From<VoteEvent> for BroadcastEvent {
    fn from(event: VoteEvent) -> Self {
        BroadcastEvent::Vote(event)
    }
}

impl From<PresenceEvent> for BroadcastEvent {
    fn from(event: PresenceEvent) -> Self {
        BroadcastEvent::Presence(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_update_flattens_state_under_type_tag() {
        let event = BroadcastEvent::from(QueueEvent::QueueUpdate(QueueState::empty(5)));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "queue");
        assert_eq!(json["type"], "queueUpdate");
        assert_eq!(json["lastUpdate"], 5);
        assert!(json["queue"].as_array().unwrap().is_empty());
        assert_eq!(event.event_name(), "queueUpdate");
    }

    #[test]
    fn queue_update_carries_display_contract_keys() {
        let state = QueueState {
            progress_ms: 61_000,
            is_playing: true,
            ..QueueState::empty(9)
        };
        let json = serde_json::to_value(QueueEvent::QueueUpdate(state)).unwrap();
        for key in ["queue", "currentTrack", "isPlaying", "progress", "lastUpdate"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["progress"], 61_000);
        assert!(json.get("progressMs").is_none());
    }

    #[test]
    fn vote_failed_uses_camel_case_fields() {
        let event = BroadcastEvent::from(VoteEvent::BanVoteFailed {
            vote_id: "v".into(),
            track_name: "Song".into(),
            yes_votes: 1,
            no_votes: 3,
            reason: "majority voted no".into(),
            timestamp: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "vote");
        assert_eq!(json["type"], "banVoteFailed");
        assert_eq!(json["noVotes"], 3);
        assert_eq!(json["reason"], "majority voted no");
    }

    #[test]
    fn user_count_event_name() {
        let event = BroadcastEvent::from(PresenceEvent::UserCount {
            count: 4,
            timestamp: 0,
        });
        assert_eq!(event.event_name(), "userCount");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "userCount");
        assert_eq!(json["count"], 4);
    }
}
