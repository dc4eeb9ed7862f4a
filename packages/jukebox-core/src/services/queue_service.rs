//! Facade over queue mutations.
//!
//! Wires metadata writes to provider mutations and triggers reconciliation
//! afterwards so clients see the result of their own action immediately.

use std::sync::Arc;

use thiserror::Error;

use super::reconciler::{QueueReconciler, ReconcileError};
use crate::events::{EventEmitter, QueueEvent};
use crate::provider::{ProviderCatalog, ProviderClient, ProviderControl, ProviderError, Track};
use crate::state::{QueueItem, QueueState};
use crate::store::{BanStore, JukeboxStore, MetadataEntry, MetadataStore, StoreError};
use crate::utils::{now_millis, validate_track_uri, TrackUriError};

/// Who is asking, as vouched for by the session collaborator.
#[derive(Debug, Clone)]
pub struct Requester {
    pub user_id: String,
    pub anonymous: bool,
}

/// Errors from queue mutations. Rejections leave no trace behind.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid track URI: {0}")]
    InvalidUri(#[from] TrackUriError),

    #[error("This track has been banned")]
    Banned,

    #[error("Nothing is playing")]
    NothingPlaying,

    #[error("Track {expected} is no longer playing")]
    StaleSkip { expected: String },

    #[error("No queued instance of {0}")]
    UnknownInstance(String),

    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue sync failed: {0}")]
    Sync(#[from] ReconcileError),
}

/// Result of a successful add.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub item: QueueItem,
    pub state: QueueState,
}

/// Result of a skip request.
#[derive(Debug, Clone)]
pub enum SkipOutcome {
    /// The provider skipped.
    Skipped { state: QueueState },
    /// A shield absorbed the skip.
    Blocked {
        shields_remaining: u32,
        state: QueueState,
    },
}

/// Queue facade used by the HTTP and WebSocket handlers.
pub struct QueueService {
    provider: Arc<dyn ProviderClient>,
    store: Arc<dyn JukeboxStore>,
    reconciler: Arc<QueueReconciler>,
    emitter: Arc<dyn EventEmitter>,
}

impl QueueService {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn JukeboxStore>,
        reconciler: Arc<QueueReconciler>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            provider,
            store,
            reconciler,
            emitter,
        }
    }

    pub fn reconciler(&self) -> &Arc<QueueReconciler> {
        &self.reconciler
    }

    /// Last broadcast state. Never calls the provider.
    pub fn get_current_state(&self) -> QueueState {
        self.reconciler
            .latest()
            .unwrap_or_else(|| QueueState::empty(now_millis()))
    }

    /// Records the request, enqueues the track, and reconciles.
    ///
    /// If the provider rejects the enqueue, the just-written row is deleted
    /// again and the provider error is returned.
    pub async fn add_to_queue(
        &self,
        track_uri: &str,
        requester: &Requester,
    ) -> Result<AddOutcome, QueueError> {
        validate_track_uri(track_uri)?;
        let uri = track_uri.trim();

        if self.store.is_banned(uri).await? {
            log::info!("[Queue] Rejected banned track {} from {}", uri, requester.user_id);
            return Err(QueueError::Banned);
        }

        let track = self.provider.get_track(uri).await?;
        let entry = self
            .store
            .insert(MetadataEntry::new(
                uri,
                now_millis(),
                requester.user_id.as_str(),
                requester.anonymous,
            ))
            .await?;

        if let Err(e) = self.provider.enqueue(uri).await {
            log::warn!("[Queue] Enqueue of {} failed, removing metadata: {}", uri, e);
            if let Err(store_err) = self.store.delete(uri, entry.added_at).await {
                // Reconciliation retires the orphan once it is never matched.
                log::error!(
                    "[Queue] Compensating delete for {}@{} failed: {}",
                    uri,
                    entry.added_at,
                    store_err
                );
            }
            return Err(e.into());
        }

        log::info!(
            "[Queue] {} queued \"{}\" by {}",
            requester.user_id,
            track.name,
            track.artist_line()
        );
        let state = self.refresh().await;
        let item = QueueItem::new(track, &entry);
        self.emitter.emit_queue(QueueEvent::QueueAdd {
            track: item.clone(),
            queue: state.queue.clone(),
            timestamp: now_millis(),
        });
        Ok(AddOutcome { item, state })
    }

    /// Skips the current track unless a shield absorbs the skip.
    ///
    /// `expected_uri` must still be the current track; otherwise the request
    /// is stale and rejected so a late click cannot skip the next song.
    pub async fn skip_current_track(&self, expected_uri: &str) -> Result<SkipOutcome, QueueError> {
        let state = self.reconciler.reconcile().await?;
        let current = state
            .current_track
            .as_ref()
            .ok_or(QueueError::NothingPlaying)?;
        let expected = expected_uri.trim();
        if current.uri() != expected {
            return Err(QueueError::StaleSkip {
                expected: expected.to_string(),
            });
        }

        let uri = current.uri().to_string();
        let added_at = current.item.added_at;
        if let Some(remaining) = self.store.consume_shield(&uri, added_at).await? {
            log::info!(
                "[Queue] Skip of {} blocked by shield ({} left)",
                uri,
                remaining
            );
            let mut blocked = current.item.clone();
            blocked.shield_count = remaining;
            self.emitter.emit_queue(QueueEvent::SkipBlocked {
                track: blocked,
                shields_remaining: remaining,
                timestamp: now_millis(),
            });
            let state = self.refresh().await;
            return Ok(SkipOutcome::Blocked {
                shields_remaining: remaining,
                state,
            });
        }

        self.provider.skip_to_next().await?;
        log::info!("[Queue] Skipped {}", uri);
        let state = self.refresh().await;
        self.emitter.emit_queue(QueueEvent::Skip {
            current_track: state.current_track.clone(),
            queue: state.queue.clone(),
            timestamp: now_millis(),
        });
        Ok(SkipOutcome::Skipped { state })
    }

    /// Searches the provider's catalog. Blank queries are rejected.
    pub async fn search(&self, query: &str) -> Result<Vec<Track>, QueueError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueueError::EmptyQuery);
        }
        Ok(self.provider.search(query).await?)
    }

    /// Adds a shield to a queued instance (the oldest when `added_at` is `None`).
    pub async fn add_shield(
        &self,
        track_uri: &str,
        added_at: Option<u64>,
    ) -> Result<MetadataEntry, QueueError> {
        validate_track_uri(track_uri)?;
        let uri = track_uri.trim();
        let entry = self
            .store
            .increment_shield(uri, added_at)
            .await?
            .ok_or_else(|| QueueError::UnknownInstance(uri.to_string()))?;
        log::info!(
            "[Queue] Shield added to {}@{} (now {})",
            uri,
            entry.added_at,
            entry.shield_count
        );
        self.refresh().await;
        Ok(entry)
    }

    /// Reconciles after a mutation. The mutation already happened, so a
    /// failed tick falls back to the cached state instead of failing the call.
    async fn refresh(&self) -> QueueState {
        match self.reconciler.reconcile().await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[Queue] Post-mutation sync failed: {}", e);
                self.get_current_state()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::provider::ProviderPlayback;
    use crate::services::reconciler::ReconcilerConfig;
    use crate::services::test_fixtures::{
        MockProvider, RecordingEmitter, TRACK_A, TRACK_B, TRACK_C,
    };
    use crate::store::{BannedTrack, InMemoryStore};

    struct Harness {
        provider: Arc<MockProvider>,
        store: Arc<InMemoryStore>,
        emitter: Arc<RecordingEmitter>,
        service: QueueService,
    }

    fn harness(provider: MockProvider) -> Harness {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryStore::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let reconciler = Arc::new(QueueReconciler::new(
            Arc::clone(&provider) as Arc<dyn ProviderPlayback>,
            Arc::clone(&store) as Arc<dyn MetadataStore>,
            Arc::clone(&emitter) as Arc<dyn EventEmitter>,
            ReconcilerConfig {
                provider_timeout: Duration::from_secs(1),
                provider_attribution: "provider".into(),
            },
        ));
        let service = QueueService::new(
            Arc::clone(&provider) as Arc<dyn ProviderClient>,
            Arc::clone(&store) as Arc<dyn JukeboxStore>,
            reconciler,
            Arc::clone(&emitter) as Arc<dyn EventEmitter>,
        );
        Harness {
            provider,
            store,
            emitter,
            service,
        }
    }

    fn alice() -> Requester {
        Requester {
            user_id: "alice".into(),
            anonymous: false,
        }
    }

    #[tokio::test]
    async fn add_records_enqueues_and_broadcasts() {
        let h = harness(MockProvider::with_state(Some(TRACK_A), &[]));

        let outcome = h.service.add_to_queue(TRACK_B, &alice()).await.unwrap();

        assert_eq!(h.provider.enqueued.lock().as_slice(), &[TRACK_B.to_string()]);
        assert_eq!(outcome.item.added_by, "alice");
        assert_eq!(outcome.state.queue.len(), 1);
        assert_eq!(outcome.state.queue[0].added_by, "alice");
        assert_eq!(h.emitter.count("queueAdd"), 1);
        assert_eq!(h.emitter.names().last(), Some(&"queueAdd"));
    }

    #[tokio::test]
    async fn invalid_uri_rejected_before_side_effects() {
        let h = harness(MockProvider::new());

        let err = h.service.add_to_queue("spotify:album:nope", &alice()).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidUri(_)));
        assert!(h.store.is_empty());
        assert!(h.provider.enqueued.lock().is_empty());
    }

    #[tokio::test]
    async fn banned_track_cannot_be_added() {
        let h = harness(MockProvider::new());
        h.store
            .insert_ban(BannedTrack {
                track_uri: TRACK_B.into(),
                track_name: "Song".into(),
                track_artist: "Artist".into(),
                banned_at: 1,
                yes_votes: 3,
                no_votes: 0,
            })
            .await
            .unwrap();

        let err = h.service.add_to_queue(TRACK_B, &alice()).await.unwrap_err();
        assert!(matches!(err, QueueError::Banned));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn failed_enqueue_removes_metadata() {
        let provider = MockProvider::with_state(Some(TRACK_A), &[]);
        provider.fail_enqueue.store(true, Ordering::SeqCst);
        let h = harness(provider);

        let err = h.service.add_to_queue(TRACK_B, &alice()).await.unwrap_err();
        assert!(matches!(err, QueueError::Provider(ProviderError::NoActiveDevice)));
        assert!(h.store.is_empty());
        assert_eq!(h.emitter.count("queueAdd"), 0);
    }

    #[tokio::test]
    async fn shields_block_skips_until_spent() {
        let h = harness(MockProvider::with_state(Some(TRACK_A), &[TRACK_B]));
        h.service.reconciler().reconcile().await.unwrap();
        h.service.add_shield(TRACK_A, None).await.unwrap();
        let entry = h.service.add_shield(TRACK_A, None).await.unwrap();
        assert_eq!(entry.shield_count, 2);

        match h.service.skip_current_track(TRACK_A).await.unwrap() {
            SkipOutcome::Blocked {
                shields_remaining, ..
            } => assert_eq!(shields_remaining, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match h.service.skip_current_track(TRACK_A).await.unwrap() {
            SkipOutcome::Blocked {
                shields_remaining,
                state,
            } => {
                assert_eq!(shields_remaining, 0);
                assert_eq!(state.current_track.unwrap().item.shield_count, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.provider.skips.load(Ordering::SeqCst), 0);
        assert_eq!(h.emitter.count("skipBlocked"), 2);

        match h.service.skip_current_track(TRACK_A).await.unwrap() {
            SkipOutcome::Skipped { state } => {
                assert_eq!(state.current_uri(), Some(TRACK_B));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.provider.skips.load(Ordering::SeqCst), 1);
        assert_eq!(h.emitter.count("skip"), 1);
    }

    #[tokio::test]
    async fn stale_skip_is_rejected() {
        let h = harness(MockProvider::with_state(Some(TRACK_B), &[TRACK_C]));

        let err = h.service.skip_current_track(TRACK_A).await.unwrap_err();
        assert!(matches!(err, QueueError::StaleSkip { .. }));
        assert_eq!(h.provider.skips.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skip_with_nothing_playing() {
        let h = harness(MockProvider::new());
        let err = h.service.skip_current_track(TRACK_A).await.unwrap_err();
        assert!(matches!(err, QueueError::NothingPlaying));
    }

    #[tokio::test]
    async fn shield_for_unknown_instance() {
        let h = harness(MockProvider::new());
        let err = h.service.add_shield(TRACK_C, Some(5)).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownInstance(_)));
    }

    #[tokio::test]
    async fn current_state_does_not_call_provider() {
        let h = harness(MockProvider::with_state(Some(TRACK_A), &[]));

        let empty = h.service.get_current_state();
        assert!(empty.current_track.is_none());
        assert_eq!(h.provider.queue_reads.load(Ordering::SeqCst), 0);

        h.service.reconciler().reconcile().await.unwrap();
        let state = h.service.get_current_state();
        assert_eq!(state.current_uri(), Some(TRACK_A));
        assert_eq!(h.provider.queue_reads.load(Ordering::SeqCst), 1);
    }
}
