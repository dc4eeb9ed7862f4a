//! Shared test doubles for service tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::events::{BroadcastEvent, EventEmitter, PresenceEvent, QueueEvent, VoteEvent};
use crate::provider::{
    NowPlaying, ProviderCatalog, ProviderControl, ProviderError, ProviderPlayback, ProviderResult,
    Track,
};

pub const TRACK_A: &str = "spotify:track:aaaaaaaaaaaaaaaaaaaaaa";
pub const TRACK_B: &str = "spotify:track:bbbbbbbbbbbbbbbbbbbbbb";
pub const TRACK_C: &str = "spotify:track:cccccccccccccccccccccc";

pub fn track(uri: &str) -> Track {
    Track {
        uri: uri.to_string(),
        name: format!("Song {}", &uri[uri.len() - 1..]),
        artists: vec!["Artist".to_string()],
        duration_ms: 180_000,
        image: None,
    }
}

pub fn now_playing(uri: &str) -> NowPlaying {
    NowPlaying {
        track: track(uri),
        is_playing: true,
        progress_ms: 1_000,
    }
}

/// Scriptable provider. Enqueue appends to the queue and skip promotes the
/// head of the queue, like the real service.
#[derive(Default)]
pub struct MockProvider {
    pub current: Mutex<Option<NowPlaying>>,
    pub queue: Mutex<Vec<Track>>,
    pub fail_reads: AtomicBool,
    pub fail_enqueue: AtomicBool,
    pub read_delay: Mutex<Option<Duration>>,
    pub queue_reads: AtomicUsize,
    pub enqueued: Mutex<Vec<String>>,
    pub skips: AtomicUsize,
    pub search_results: Mutex<Vec<Track>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(current: Option<&str>, queue: &[&str]) -> Self {
        let provider = Self::new();
        provider.set_state(current, queue);
        provider
    }

    pub fn set_state(&self, current: Option<&str>, queue: &[&str]) {
        *self.current.lock() = current.map(now_playing);
        *self.queue.lock() = queue.iter().map(|uri| track(uri)).collect();
    }

    async fn delay(&self) {
        let delay = *self.read_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ProviderPlayback for MockProvider {
    async fn current_track(&self) -> ProviderResult<Option<NowPlaying>> {
        self.delay().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ProviderError::HttpStatus(503, "unavailable".into()));
        }
        Ok(self.current.lock().clone())
    }

    async fn queue_snapshot(&self) -> ProviderResult<Vec<Track>> {
        self.delay().await;
        self.queue_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ProviderError::HttpStatus(503, "unavailable".into()));
        }
        Ok(self.queue.lock().clone())
    }
}

#[async_trait]
impl ProviderControl for MockProvider {
    async fn enqueue(&self, uri: &str) -> ProviderResult<()> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(ProviderError::NoActiveDevice);
        }
        self.enqueued.lock().push(uri.to_string());
        self.queue.lock().push(track(uri));
        Ok(())
    }

    async fn skip_to_next(&self) -> ProviderResult<()> {
        self.skips.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue.lock();
        let next = if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        };
        *self.current.lock() = next.map(|track| NowPlaying {
            track,
            is_playing: true,
            progress_ms: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl ProviderCatalog for MockProvider {
    async fn get_track(&self, uri: &str) -> ProviderResult<Track> {
        Ok(track(uri))
    }

    async fn search(&self, _query: &str) -> ProviderResult<Vec<Track>> {
        Ok(self.search_results.lock().clone())
    }
}

/// Emitter that records every event for later inspection.
#[derive(Default)]
pub struct RecordingEmitter {
    pub events: Mutex<Vec<BroadcastEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire names of recorded events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(BroadcastEvent::event_name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_queue(&self, event: QueueEvent) {
        self.events.lock().push(event.into());
    }

    fn emit_vote(&self, event: VoteEvent) {
        self.events.lock().push(event.into());
    }

    fn emit_presence(&self, event: PresenceEvent) {
        self.events.lock().push(event.into());
    }
}
