//! Crowd-sourced ban votes.
//!
//! At most one vote is active system-wide. A vote moves from Active to
//! exactly one terminal outcome (passed, majority no, impossible to pass,
//! or expired) and the slot is emptied before anything is persisted or
//! emitted. The expiry timer races a cancellation token, so a timer firing
//! against a vote that already finished is a no-op.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, VoteEvent};
use crate::protocol_constants::{REASON_EXPIRED, REASON_IMPOSSIBLE, REASON_MAJORITY_NO};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::store::{BanStore, BannedTrack, StoreError};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A voter's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ballot {
    Yes,
    No,
}

/// Everything needed to open a vote.
#[derive(Debug, Clone)]
pub struct BanVoteRequest {
    pub track_uri: String,
    pub track_name: String,
    pub track_artist: String,
    pub initiator: String,
}

/// Public view of the active vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub vote_id: String,
    pub track_uri: String,
    pub track_name: String,
    pub track_artist: String,
    pub initiator: String,
    /// Online users when the vote opened; fixed for the vote's lifetime.
    pub online_count: u32,
    pub required_votes: u32,
    pub yes_votes: u32,
    pub no_votes: u32,
    pub expires_in_ms: u64,
}

/// Tallies reported after a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub vote_id: String,
    pub track_uri: String,
    pub track_name: String,
    pub track_artist: String,
    pub yes_votes: u32,
    pub no_votes: u32,
    pub online_count: u32,
    pub required_votes: u32,
}

/// Result of a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum VoteOutcome {
    /// Still open.
    Pending(VoteTally),
    /// Passed; the track is banned.
    Passed(VoteTally),
    /// Failed for `reason`.
    Failed {
        #[serde(flatten)]
        tally: VoteTally,
        reason: String,
    },
}

/// Rejections from [`VoteManager`]. None of these mutate state.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("A ban vote is already in progress")]
    AlreadyActive,

    #[error("Need at least {required} users online to start a vote ({online} online)")]
    NotEnoughUsers { online: u32, required: u32 },

    #[error("This track is already banned")]
    AlreadyBanned,

    #[error("Vote not found or expired")]
    NotFound,

    #[error("You have already voted")]
    AlreadyVoted,

    #[error("Ban store failed: {0}")]
    Store(#[from] StoreError),
}

/// Tuning for [`VoteManager`].
#[derive(Debug, Clone)]
pub struct VoteConfig {
    /// Wall-clock lifetime of a vote from its start.
    pub duration: Duration,
    /// Online users needed to open a vote.
    pub min_online: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// State Machine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ActiveVote {
    id: String,
    track_uri: String,
    track_name: String,
    track_artist: String,
    initiator: String,
    online_count: u32,
    required_votes: u32,
    yes: HashSet<String>,
    no: HashSet<String>,
    started_at: Instant,
    duration: Duration,
    expiry: CancellationToken,
}

impl ActiveVote {
    fn tally(&self) -> VoteTally {
        VoteTally {
            vote_id: self.id.clone(),
            track_uri: self.track_uri.clone(),
            track_name: self.track_name.clone(),
            track_artist: self.track_artist.clone(),
            yes_votes: self.yes.len() as u32,
            no_votes: self.no.len() as u32,
            online_count: self.online_count,
            required_votes: self.required_votes,
        }
    }

    fn summary(&self) -> VoteSummary {
        let elapsed = self.started_at.elapsed();
        VoteSummary {
            vote_id: self.id.clone(),
            track_uri: self.track_uri.clone(),
            track_name: self.track_name.clone(),
            track_artist: self.track_artist.clone(),
            initiator: self.initiator.clone(),
            online_count: self.online_count,
            required_votes: self.required_votes,
            yes_votes: self.yes.len() as u32,
            no_votes: self.no.len() as u32,
            expires_in_ms: self.duration.saturating_sub(elapsed).as_millis() as u64,
        }
    }

    fn decide(&self) -> Option<Result<(), &'static str>> {
        decide(
            self.yes.len() as u32,
            self.no.len() as u32,
            self.online_count,
            self.required_votes,
        )
    }
}

/// Simple majority of the users online at vote start.
pub fn required_votes(online_count: u32) -> u32 {
    online_count.div_ceil(2)
}

/// `None` while undecided, `Some(Ok)` on pass, `Some(Err(reason))` on failure.
///
/// Passing is checked first; among failures, a "no" majority takes
/// precedence over arithmetic impossibility.
fn decide(yes: u32, no: u32, online: u32, required: u32) -> Option<Result<(), &'static str>> {
    if yes >= required {
        return Some(Ok(()));
    }
    if no >= required {
        return Some(Err(REASON_MAJORITY_NO));
    }
    let undecided = online.saturating_sub(yes + no);
    if yes + undecided < required {
        return Some(Err(REASON_IMPOSSIBLE));
    }
    None
}

/// Owner of the single active-vote slot.
pub struct VoteManager {
    slot: Mutex<Option<ActiveVote>>,
    bans: Arc<dyn BanStore>,
    emitter: Arc<dyn EventEmitter>,
    config: VoteConfig,
    spawner: TokioSpawner,
    /// Handle to ourselves for expiry timers.
    weak_self: Weak<VoteManager>,
}

impl VoteManager {
    pub fn new(
        bans: Arc<dyn BanStore>,
        emitter: Arc<dyn EventEmitter>,
        config: VoteConfig,
        spawner: TokioSpawner,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            slot: Mutex::new(None),
            bans,
            emitter,
            config,
            spawner,
            weak_self: weak_self.clone(),
        })
    }

    /// Summary of the active vote, if any.
    pub fn active_vote(&self) -> Option<VoteSummary> {
        self.slot.lock().as_ref().map(ActiveVote::summary)
    }

    /// Opens a vote with the initiator counted as a "yes".
    ///
    /// `online_count` is fixed for the vote's lifetime.
    pub async fn start_ban_vote(
        &self,
        request: BanVoteRequest,
        online_count: u32,
    ) -> Result<VoteSummary, VoteError> {
        if self.slot.lock().is_some() {
            return Err(VoteError::AlreadyActive);
        }
        if online_count < self.config.min_online {
            return Err(VoteError::NotEnoughUsers {
                online: online_count,
                required: self.config.min_online,
            });
        }
        if self.bans.is_banned(&request.track_uri).await? {
            return Err(VoteError::AlreadyBanned);
        }

        let (summary, finished) = {
            let mut slot = self.slot.lock();
            // Another vote may have opened while we checked the ban list.
            if slot.is_some() {
                return Err(VoteError::AlreadyActive);
            }
            let vote = ActiveVote {
                id: uuid::Uuid::new_v4().to_string(),
                track_uri: request.track_uri,
                track_name: request.track_name,
                track_artist: request.track_artist,
                yes: HashSet::from([request.initiator.clone()]),
                initiator: request.initiator,
                online_count,
                required_votes: required_votes(online_count),
                no: HashSet::new(),
                started_at: Instant::now(),
                duration: self.config.duration,
                expiry: CancellationToken::new(),
            };
            let summary = vote.summary();
            self.spawn_expiry(&vote);

            let finished = match vote.decide() {
                Some(decision) => {
                    vote.expiry.cancel();
                    Some((vote, decision))
                }
                None => {
                    *slot = Some(vote);
                    None
                }
            };
            (summary, finished)
        };

        log::info!(
            "[Votes] Ban vote {} started for {} by {} (online={}, required={})",
            summary.vote_id,
            summary.track_uri,
            summary.initiator,
            summary.online_count,
            summary.required_votes
        );
        self.emitter
            .emit_vote(VoteEvent::BanVoteStarted(summary.clone()));

        if let Some((vote, decision)) = finished {
            self.complete(vote, decision).await;
        }
        Ok(summary)
    }

    /// Records a ballot. Switching sides moves the voter.
    pub async fn cast_vote(
        &self,
        vote_id: &str,
        user_id: &str,
        ballot: Ballot,
    ) -> Result<VoteOutcome, VoteError> {
        let (tally, finished) = {
            let mut slot = self.slot.lock();
            let vote = slot
                .as_mut()
                .filter(|v| v.id == vote_id)
                .ok_or(VoteError::NotFound)?;

            let (chosen, other) = match ballot {
                Ballot::Yes => (&mut vote.yes, &mut vote.no),
                Ballot::No => (&mut vote.no, &mut vote.yes),
            };
            if chosen.contains(user_id) {
                return Err(VoteError::AlreadyVoted);
            }
            other.remove(user_id);
            chosen.insert(user_id.to_string());

            let tally = vote.tally();
            let finished = match vote.decide() {
                Some(decision) => {
                    // Empty the slot before anything observes the outcome.
                    let vote = slot.take().ok_or(VoteError::NotFound)?;
                    vote.expiry.cancel();
                    Some((vote, decision))
                }
                None => None,
            };
            (tally, finished)
        };

        log::debug!(
            "[Votes] {} voted {:?} on {} (yes={}, no={}, required={})",
            user_id,
            ballot,
            vote_id,
            tally.yes_votes,
            tally.no_votes,
            tally.required_votes
        );

        match finished {
            Some((vote, decision)) => Ok(self.complete(vote, decision).await),
            None => {
                self.emitter.emit_vote(VoteEvent::BanVoteUpdate {
                    vote_id: tally.vote_id.clone(),
                    track_name: tally.track_name.clone(),
                    yes_votes: tally.yes_votes,
                    no_votes: tally.no_votes,
                    online_count: tally.online_count,
                    required_votes: tally.required_votes,
                    timestamp: now_millis(),
                });
                Ok(VoteOutcome::Pending(tally))
            }
        }
    }

    /// Cancels any running expiry timer without emitting.
    pub fn shutdown(&self) {
        if let Some(vote) = self.slot.lock().take() {
            vote.expiry.cancel();
            log::info!("[Votes] Discarded active vote {} on shutdown", vote.id);
        }
    }

    fn spawn_expiry(&self, vote: &ActiveVote) {
        let token = vote.expiry.clone();
        let vote_id = vote.id.clone();
        let duration = vote.duration;
        let manager = self.weak_self.clone();
        self.spawner.spawn_deadline(duration, token, async move {
            if let Some(manager) = manager.upgrade() {
                manager.expire(&vote_id).await;
            }
        });
    }

    /// Timer path. No-op unless `vote_id` still owns the slot.
    async fn expire(&self, vote_id: &str) {
        let vote = {
            let mut slot = self.slot.lock();
            if slot.as_ref().map(|v| v.id.as_str()) != Some(vote_id) {
                log::debug!("[Votes] Timer for finished vote {} ignored", vote_id);
                return;
            }
            slot.take()
        };
        if let Some(vote) = vote {
            self.complete(vote, Err(REASON_EXPIRED)).await;
        }
    }

    /// Single completion path for every terminal transition. The vote has
    /// already left the slot.
    async fn complete(&self, vote: ActiveVote, decision: Result<(), &'static str>) -> VoteOutcome {
        let tally = vote.tally();
        let timestamp = now_millis();
        match decision {
            Ok(()) => {
                log::info!(
                    "[Votes] Vote {} passed ({} yes / {} no); banning {}",
                    tally.vote_id,
                    tally.yes_votes,
                    tally.no_votes,
                    tally.track_uri
                );
                let ban = BannedTrack {
                    track_uri: tally.track_uri.clone(),
                    track_name: tally.track_name.clone(),
                    track_artist: tally.track_artist.clone(),
                    banned_at: timestamp,
                    yes_votes: tally.yes_votes,
                    no_votes: tally.no_votes,
                };
                if let Err(e) = self.bans.insert_ban(ban).await {
                    log::error!("[Votes] Failed to persist ban for {}: {}", tally.track_uri, e);
                }
                self.emitter.emit_vote(VoteEvent::BanVotePassed {
                    vote_id: tally.vote_id.clone(),
                    track_uri: tally.track_uri.clone(),
                    track_name: tally.track_name.clone(),
                    track_artist: tally.track_artist.clone(),
                    yes_votes: tally.yes_votes,
                    no_votes: tally.no_votes,
                    timestamp,
                });
                VoteOutcome::Passed(tally)
            }
            Err(reason) => {
                log::info!(
                    "[Votes] Vote {} failed: {} ({} yes / {} no)",
                    tally.vote_id,
                    reason,
                    tally.yes_votes,
                    tally.no_votes
                );
                self.emitter.emit_vote(VoteEvent::BanVoteFailed {
                    vote_id: tally.vote_id.clone(),
                    track_name: tally.track_name.clone(),
                    yes_votes: tally.yes_votes,
                    no_votes: tally.no_votes,
                    reason: reason.to_string(),
                    timestamp,
                });
                VoteOutcome::Failed {
                    tally,
                    reason: reason.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_fixtures::{RecordingEmitter, TRACK_A};
    use crate::store::InMemoryStore;

    struct Harness {
        manager: Arc<VoteManager>,
        store: Arc<InMemoryStore>,
        emitter: Arc<RecordingEmitter>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let manager = VoteManager::new(
            Arc::clone(&store) as Arc<dyn BanStore>,
            Arc::clone(&emitter) as Arc<dyn EventEmitter>,
            VoteConfig {
                duration: Duration::from_secs(45),
                min_online: 3,
            },
            TokioSpawner::new(tokio::runtime::Handle::current()),
        );
        Harness {
            manager,
            store,
            emitter,
        }
    }

    fn request(initiator: &str) -> BanVoteRequest {
        BanVoteRequest {
            track_uri: TRACK_A.into(),
            track_name: "Song".into(),
            track_artist: "Artist".into(),
            initiator: initiator.into(),
        }
    }

    #[test]
    fn required_votes_is_ceiling_half() {
        assert_eq!(required_votes(5), 3);
        assert_eq!(required_votes(4), 2);
        assert_eq!(required_votes(3), 2);
        assert_eq!(required_votes(1), 1);
    }

    #[test]
    fn decide_prefers_pass_then_majority_no() {
        assert_eq!(decide(3, 0, 5, 3), Some(Ok(())));
        assert_eq!(decide(1, 3, 5, 3), Some(Err(REASON_MAJORITY_NO)));
        // 1 yes + 1 undecided can never reach 3.
        assert_eq!(decide(1, 2, 4, 3), Some(Err(REASON_IMPOSSIBLE)));
        assert_eq!(decide(1, 1, 5, 3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn three_yes_of_five_passes_and_empties_slot() {
        let h = harness();
        let vote = h.manager.start_ban_vote(request("u1"), 5).await.unwrap();
        assert_eq!(vote.required_votes, 3);
        assert_eq!(vote.yes_votes, 1);

        let outcome = h.manager.cast_vote(&vote.vote_id, "u2", Ballot::Yes).await.unwrap();
        assert!(matches!(outcome, VoteOutcome::Pending(_)));
        let outcome = h.manager.cast_vote(&vote.vote_id, "u3", Ballot::Yes).await.unwrap();
        match outcome {
            VoteOutcome::Passed(tally) => {
                assert_eq!((tally.yes_votes, tally.no_votes), (3, 0));
                assert_eq!(tally.track_uri, TRACK_A);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert!(h.manager.active_vote().is_none());
        assert!(h.store.is_banned(TRACK_A).await.unwrap());
        let err = h
            .manager
            .cast_vote(&vote.vote_id, "u4", Ballot::Yes)
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::NotFound));
        assert_eq!(err.to_string(), "Vote not found or expired");

        // The cancelled timer never reports.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.emitter.count("banVoteFailed"), 0);
        assert_eq!(h.emitter.count("banVotePassed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn majority_no_fails_with_reason() {
        let h = harness();
        let vote = h.manager.start_ban_vote(request("u1"), 5).await.unwrap();

        h.manager.cast_vote(&vote.vote_id, "u2", Ballot::No).await.unwrap();
        h.manager.cast_vote(&vote.vote_id, "u3", Ballot::No).await.unwrap();
        let outcome = h.manager.cast_vote(&vote.vote_id, "u4", Ballot::No).await.unwrap();

        match outcome {
            VoteOutcome::Failed { tally, reason } => {
                assert_eq!(reason, "majority voted no");
                assert_eq!((tally.yes_votes, tally.no_votes), (1, 3));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.manager.active_vote().is_none());
        assert!(!h.store.is_banned(TRACK_A).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn even_split_fails_once_no_reaches_half() {
        let h = harness();
        let vote = h.manager.start_ban_vote(request("u1"), 4).await.unwrap();
        assert_eq!(vote.required_votes, 2);

        h.manager.cast_vote(&vote.vote_id, "u2", Ballot::No).await.unwrap();
        let outcome = h.manager.cast_vote(&vote.vote_id, "u3", Ballot::No).await.unwrap();
        assert!(
            matches!(outcome, VoteOutcome::Failed { ref reason, .. } if reason == "majority voted no")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fails_exactly_once() {
        let h = harness();
        let vote = h.manager.start_ban_vote(request("u1"), 5).await.unwrap();

        tokio::time::sleep(Duration::from_secs(46)).await;

        assert!(h.manager.active_vote().is_none());
        assert_eq!(h.emitter.count("banVoteFailed"), 1);
        let err = h
            .manager
            .cast_vote(&vote.vote_id, "u2", Ballot::Yes)
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::NotFound));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.emitter.count("banVoteFailed"), 1);
        let failed = h.emitter.events.lock().iter().any(|e| {
            matches!(
                e,
                crate::events::BroadcastEvent::Vote(VoteEvent::BanVoteFailed { reason, .. })
                    if reason == "time expired"
            )
        });
        assert!(failed);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_ballot_rejected_but_switching_allowed() {
        let h = harness();
        let vote = h.manager.start_ban_vote(request("u1"), 6).await.unwrap();

        let err = h
            .manager
            .cast_vote(&vote.vote_id, "u1", Ballot::Yes)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "You have already voted");

        let outcome = h.manager.cast_vote(&vote.vote_id, "u1", Ballot::No).await.unwrap();
        match outcome {
            VoteOutcome::Pending(tally) => assert_eq!((tally.yes_votes, tally.no_votes), (0, 1)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejections() {
        let h = harness();

        let err = h.manager.start_ban_vote(request("u1"), 2).await.unwrap_err();
        assert!(matches!(err, VoteError::NotEnoughUsers { online: 2, required: 3 }));

        h.manager.start_ban_vote(request("u1"), 5).await.unwrap();
        let err = h.manager.start_ban_vote(request("u2"), 5).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyActive));

        h.manager.shutdown();
        h.store
            .insert_ban(BannedTrack {
                track_uri: TRACK_A.into(),
                track_name: "Song".into(),
                track_artist: "Artist".into(),
                banned_at: 1,
                yes_votes: 3,
                no_votes: 0,
            })
            .await
            .unwrap();
        let err = h.manager.start_ban_vote(request("u1"), 5).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyBanned));
    }

    #[tokio::test(start_paused = true)]
    async fn active_vote_reports_remaining_time() {
        let h = harness();
        h.manager.start_ban_vote(request("u1"), 5).await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        let summary = h.manager.active_vote().unwrap();
        assert_eq!(summary.expires_in_ms, 30_000);
        assert_eq!(summary.online_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_vote_silently() {
        let h = harness();
        h.manager.start_ban_vote(request("u1"), 5).await.unwrap();
        h.manager.shutdown();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.manager.active_vote().is_none());
        assert_eq!(h.emitter.count("banVoteFailed"), 0);
    }
}
