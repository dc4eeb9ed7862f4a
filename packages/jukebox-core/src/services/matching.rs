//! Duplicate-safe pairing of provider positions with metadata rows.
//!
//! The provider reports a queue in which the same URI may occur several
//! times with nothing to tell the occurrences apart. Rows are therefore
//! handed out per URI in FIFO order of `added_at`: the current track claims
//! first, then queue positions in provider order. N occurrences of a URI
//! receive the N oldest rows, and no row is claimed twice.

use std::collections::{HashMap, VecDeque};

use crate::provider::{NowPlaying, Track};
use crate::store::MetadataEntry;

/// Per-URI FIFO queues of unclaimed rows.
#[derive(Debug, Default)]
pub struct MetadataPool {
    rows: HashMap<String, VecDeque<MetadataEntry>>,
}

impl MetadataPool {
    /// Groups rows by URI, oldest first regardless of input order.
    pub fn new(rows: Vec<MetadataEntry>) -> Self {
        let mut grouped: HashMap<String, Vec<MetadataEntry>> = HashMap::new();
        for row in rows {
            grouped.entry(row.track_uri.clone()).or_default().push(row);
        }
        let rows = grouped
            .into_iter()
            .map(|(uri, mut rows)| {
                rows.sort_by_key(|r| r.added_at);
                (uri, VecDeque::from(rows))
            })
            .collect();
        Self { rows }
    }

    /// Takes the oldest unclaimed row for `uri`.
    pub fn claim(&mut self, uri: &str) -> Option<MetadataEntry> {
        self.rows.get_mut(uri).and_then(VecDeque::pop_front)
    }

    /// Rows nobody claimed.
    pub fn remaining(&self) -> usize {
        self.rows.values().map(VecDeque::len).sum()
    }
}

/// Snapshot positions paired with the rows they claimed.
///
/// `None` marks a position with no unclaimed row left; the caller
/// bootstraps an entry for it.
#[derive(Debug)]
pub struct MatchedSnapshot {
    pub current: Option<(NowPlaying, Option<MetadataEntry>)>,
    pub queue: Vec<(Track, Option<MetadataEntry>)>,
}

impl MatchedSnapshot {
    /// Number of positions that need a bootstrapped entry.
    pub fn unmatched(&self) -> usize {
        let current = self
            .current
            .as_ref()
            .map_or(0, |(_, row)| usize::from(row.is_none()));
        current + self.queue.iter().filter(|(_, row)| row.is_none()).count()
    }
}

/// Pairs the current track and every queue position with a row.
pub fn match_snapshot(
    current: Option<NowPlaying>,
    queue: Vec<Track>,
    pool: &mut MetadataPool,
) -> MatchedSnapshot {
    let current = current.map(|now| {
        let row = pool.claim(&now.track.uri);
        (now, row)
    });
    let queue = queue
        .into_iter()
        .map(|track| {
            let row = pool.claim(&track.uri);
            (track, row)
        })
        .collect();
    MatchedSnapshot { current, queue }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: &str = "spotify:track:xxxxxxxxxxxxxxxxxxxxxx";
    const Y: &str = "spotify:track:yyyyyyyyyyyyyyyyyyyyyy";

    fn track(uri: &str) -> Track {
        Track {
            uri: uri.into(),
            name: uri.into(),
            artists: vec![],
            duration_ms: 0,
            image: None,
        }
    }

    fn now(uri: &str) -> NowPlaying {
        NowPlaying {
            track: track(uri),
            is_playing: true,
            progress_ms: 0,
        }
    }

    fn row(uri: &str, added_at: u64, by: &str) -> MetadataEntry {
        MetadataEntry::new(uri, added_at, by, false)
    }

    #[test]
    fn duplicates_get_oldest_rows_in_order() {
        let mut pool = MetadataPool::new(vec![
            row(X, 30, "third"),
            row(X, 10, "first"),
            row(X, 20, "second"),
        ]);
        let matched = match_snapshot(None, vec![track(X), track(X), track(X)], &mut pool);

        let by: Vec<_> = matched
            .queue
            .iter()
            .map(|(_, r)| r.as_ref().unwrap().added_by.as_str())
            .collect();
        assert_eq!(by, vec!["first", "second", "third"]);
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn current_track_claims_before_queue() {
        let mut pool = MetadataPool::new(vec![row(X, 10, "playing"), row(X, 20, "queued")]);
        let matched = match_snapshot(Some(now(X)), vec![track(X)], &mut pool);

        assert_eq!(matched.current.unwrap().1.unwrap().added_by, "playing");
        assert_eq!(matched.queue[0].1.as_ref().unwrap().added_by, "queued");
    }

    #[test]
    fn extra_occurrences_are_unmatched() {
        let mut pool = MetadataPool::new(vec![row(X, 10, "only")]);
        let matched = match_snapshot(None, vec![track(X), track(Y), track(X)], &mut pool);

        assert!(matched.queue[0].1.is_some());
        assert!(matched.queue[1].1.is_none());
        assert!(matched.queue[2].1.is_none());
        assert_eq!(matched.unmatched(), 2);
    }

    #[test]
    fn unclaimed_rows_stay_in_pool() {
        let mut pool = MetadataPool::new(vec![row(X, 10, "a"), row(X, 20, "b"), row(Y, 5, "c")]);
        let matched = match_snapshot(Some(now(Y)), vec![track(X)], &mut pool);

        assert_eq!(matched.unmatched(), 0);
        assert_eq!(pool.remaining(), 1);
        assert_eq!(pool.claim(X).unwrap().added_by, "b");
    }

    #[test]
    fn empty_snapshots_match_nothing() {
        let mut pool = MetadataPool::new(vec![row(X, 10, "a")]);
        let matched = match_snapshot(None, vec![], &mut pool);
        assert!(matched.current.is_none());
        assert!(matched.queue.is_empty());
        assert_eq!(pool.remaining(), 1);
    }
}
