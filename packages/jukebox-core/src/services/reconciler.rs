//! Queue reconciliation against the provider's polled snapshots.
//!
//! Each tick fetches the now-playing track and the upcoming queue, pairs
//! every position with a metadata row (see [`matching`](super::matching)),
//! bootstraps rows for positions the store has never seen, retires the row
//! of the instance that just finished playing, and broadcasts the merged
//! state.
//!
//! Ticks are single-flight. A caller that arrives while a tick runs waits
//! for it; if a tick that started after the caller's request has already
//! completed, the caller gets that tick's result instead of running another.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::matching::{match_snapshot, MetadataPool};
use crate::events::{EventEmitter, QueueEvent};
use crate::protocol_constants::NETWORK_ERROR_LOG_INTERVAL_MS;
use crate::provider::{NowPlaying, ProviderError, ProviderPlayback, ProviderResult, Track};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::{CurrentTrackView, QueueItem, QueueState};
use crate::store::{MetadataEntry, MetadataStore, StoreError};
use crate::utils::now_millis;

/// Reasons a tick was aborted.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Provider read failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Metadata store failed: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// True when the tick failed for lack of connectivity.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_network())
    }
}

/// Tuning for [`QueueReconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Bound on each provider read.
    pub provider_timeout: Duration,
    /// `added_by` written on bootstrapped rows.
    pub provider_attribution: String,
}

/// Row claimed by the current track at the end of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlayedInstance {
    uri: String,
    added_at: u64,
    progress_ms: u64,
}

/// State owned by whichever caller holds the tick lock.
#[derive(Debug, Default)]
struct TickState {
    /// Current-track instance at the end of the last successful tick.
    previous: Option<PlayedInstance>,
    /// Head URI and length of the last queue snapshot.
    previous_head: Option<String>,
    previous_queue_len: usize,
    /// Highest request ticket answered by a successful tick.
    completed_ticket: u64,
}

impl TickState {
    /// The previous instance, if the snapshot shows it has finished playing.
    ///
    /// A different URI (or nothing) now playing means it finished. The same
    /// URI counts as a new instance only when playback restarted and the
    /// queue head carrying that URI was consumed.
    fn finished_instance(
        &self,
        current: Option<&NowPlaying>,
        queue: &[Track],
    ) -> Option<&PlayedInstance> {
        let previous = self.previous.as_ref()?;
        let Some(now) = current else {
            return Some(previous);
        };
        if now.track.uri != previous.uri {
            return Some(previous);
        }
        let restarted = now.progress_ms < previous.progress_ms;
        let head_consumed = self.previous_head.as_deref() == Some(previous.uri.as_str())
            && queue.len() < self.previous_queue_len;
        (restarted && head_consumed).then_some(previous)
    }
}

/// Single-flight reconciler of provider state with stored metadata.
pub struct QueueReconciler {
    provider: Arc<dyn ProviderPlayback>,
    store: Arc<dyn MetadataStore>,
    emitter: Arc<dyn EventEmitter>,
    config: ReconcilerConfig,
    tick: Mutex<TickState>,
    /// Monotonic request counter; tickets start at 1.
    requested: AtomicU64,
    /// Last broadcast state.
    latest: RwLock<Option<QueueState>>,
    /// Unix ms of the last network-error warning.
    last_network_warning_ms: AtomicU64,
}

impl QueueReconciler {
    pub fn new(
        provider: Arc<dyn ProviderPlayback>,
        store: Arc<dyn MetadataStore>,
        emitter: Arc<dyn EventEmitter>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            provider,
            store,
            emitter,
            config,
            tick: Mutex::new(TickState::default()),
            requested: AtomicU64::new(0),
            latest: RwLock::new(None),
            last_network_warning_ms: AtomicU64::new(0),
        }
    }

    /// Last successfully broadcast state, without touching the provider.
    pub fn latest(&self) -> Option<QueueState> {
        self.latest.read().clone()
    }

    /// Runs (or joins) a reconciliation tick and returns the merged state.
    ///
    /// A failed provider read writes nothing. Nothing is broadcast on any
    /// failure; rows persisted before a store failure are matched by the
    /// next tick.
    pub async fn reconcile(&self) -> Result<QueueState, ReconcileError> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tick = self.tick.lock().await;

        if tick.completed_ticket >= ticket {
            if let Some(state) = self.latest() {
                log::trace!("[Reconciler] Request {} coalesced", ticket);
                return Ok(state);
            }
        }

        // Every request issued before this point is answered by this tick.
        let covers = self.requested.load(Ordering::SeqCst);
        match self.run_tick(&mut tick).await {
            Ok(state) => {
                tick.completed_ticket = covers;
                Ok(state)
            }
            Err(e) => {
                self.log_failure(&e);
                Err(e)
            }
        }
    }

    async fn run_tick(&self, tick: &mut TickState) -> Result<QueueState, ReconcileError> {
        let limit = self.config.provider_timeout;
        let (current, queue) = tokio::join!(
            bounded(limit, self.provider.current_track()),
            bounded(limit, self.provider.queue_snapshot()),
        );
        let (current, queue) = (current?, queue?);

        let mut uris: Vec<String> = current
            .iter()
            .map(|now| now.track.uri.clone())
            .chain(queue.iter().map(|t| t.uri.clone()))
            .collect();
        uris.sort();
        uris.dedup();
        let mut rows = self.store.find_by_uris(&uris).await?;

        // The finished instance's row must not be claimed by a queued duplicate.
        let finished = tick.finished_instance(current.as_ref(), &queue).cloned();
        if let Some(done) = &finished {
            rows.retain(|row| !(row.track_uri == done.uri && row.added_at == done.added_at));
        }
        let changed = finished.is_some() || (tick.previous.is_none() && current.is_some());
        let queue_head = queue.first().map(|t| t.uri.clone());
        let queue_len = queue.len();

        let mut pool = MetadataPool::new(rows);
        let matched = match_snapshot(current, queue, &mut pool);
        let unmatched = matched.unmatched();
        let now = now_millis();

        // Store writes from here on. On failure `tick` is left as is: the
        // retry deletes the same row again (a no-op) and matches rows
        // bootstrapped so far.
        if let Some(done) = &finished {
            self.retire(done).await?;
        }
        let current_view = match matched.current {
            Some((playing, row)) => {
                let entry = self.resolve(row, &playing.track.uri, now).await?;
                Some(CurrentTrackView::new(playing, &entry))
            }
            None => None,
        };
        let mut items = Vec::with_capacity(matched.queue.len());
        for (track, row) in matched.queue {
            let entry = self.resolve(row, &track.uri, now).await?;
            items.push(QueueItem::new(track, &entry));
        }
        if unmatched > 0 {
            log::info!("[Reconciler] Bootstrapped {} unknown track(s)", unmatched);
        }

        tick.previous = current_view.as_ref().map(|c| PlayedInstance {
            uri: c.uri().to_string(),
            added_at: c.item.added_at,
            progress_ms: c.progress_ms,
        });
        tick.previous_head = queue_head;
        tick.previous_queue_len = queue_len;

        let (is_playing, progress_ms) = current_view
            .as_ref()
            .map_or((false, 0), |c| (c.is_playing, c.progress_ms));
        let state = QueueState {
            current_track: current_view,
            queue: items,
            is_playing,
            progress_ms,
            last_update: now,
        };

        *self.latest.write() = Some(state.clone());
        self.emitter
            .emit_queue(QueueEvent::QueueUpdate(state.clone()));
        if changed {
            self.emitter.emit_queue(QueueEvent::CurrentTrack {
                track: state.current_track.clone(),
                timestamp: now,
            });
        }
        Ok(state)
    }

    /// Returns the matched row, or persists a synthesized one.
    async fn resolve(
        &self,
        row: Option<MetadataEntry>,
        uri: &str,
        now: u64,
    ) -> Result<MetadataEntry, ReconcileError> {
        match row {
            Some(row) => Ok(row),
            None => {
                let entry =
                    MetadataEntry::new(uri, now, self.config.provider_attribution.as_str(), false);
                Ok(self.store.insert(entry).await?)
            }
        }
    }

    /// Deletes the row of an instance that finished playing.
    ///
    /// Other instances of the same URI keep their rows, so a URI's metadata
    /// is gone only once its last instance has played.
    async fn retire(&self, done: &PlayedInstance) -> Result<(), ReconcileError> {
        if self.store.delete(&done.uri, done.added_at).await? {
            log::info!(
                "[Reconciler] Retired metadata for {} (added {})",
                done.uri,
                done.added_at
            );
        }
        Ok(())
    }

    fn log_failure(&self, err: &ReconcileError) {
        if !err.is_network() {
            log::error!("[Reconciler] Sync failed: {}", err);
            return;
        }
        let now = now_millis();
        let last = self.last_network_warning_ms.load(Ordering::Relaxed);
        if network_warning_due(last, now) {
            self.last_network_warning_ms.store(now, Ordering::Relaxed);
            log::warn!(
                "[Reconciler] Network error reaching provider, will retry: {}",
                err
            );
        } else {
            log::debug!("[Reconciler] Network error (suppressed): {}", err);
        }
    }

    /// Spawns the periodic sync loop. Stops when `cancel` fires.
    pub fn start_sync_loop(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
        spawner: &TokioSpawner,
    ) {
        log::info!(
            "[Reconciler] Starting sync loop (every {}ms)",
            interval.as_millis()
        );
        spawner.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Failures are logged inside; the next tick retries.
                        let _ = self.reconcile().await;
                    }
                }
            }
            log::info!("[Reconciler] Sync loop stopped");
        });
    }
}

/// Applies a deadline to a provider read.
async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(ProviderError::Timeout))
}

/// Network warnings are emitted at most once per interval.
fn network_warning_due(last_ms: u64, now_ms: u64) -> bool {
    last_ms == 0 || now_ms.saturating_sub(last_ms) >= NETWORK_ERROR_LOG_INTERVAL_MS
}
