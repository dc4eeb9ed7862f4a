//! In-memory store backed by per-URI FIFO queues.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BanStore, BannedTrack, MetadataEntry, MetadataStore, StoreResult};

/// Volatile store for development and tests. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Rows per URI, oldest first.
    rows: DashMap<String, VecDeque<MetadataEntry>>,
    bans: DashMap<String, BannedTrack>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of metadata rows.
    pub fn len(&self) -> usize {
        self.rows.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn find_by_uris(&self, uris: &[String]) -> StoreResult<Vec<MetadataEntry>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for uri in uris {
            if !seen.insert(uri.as_str()) {
                continue;
            }
            if let Some(rows) = self.rows.get(uri) {
                out.extend(rows.iter().cloned());
            }
        }
        Ok(out)
    }

    async fn insert(&self, mut entry: MetadataEntry) -> StoreResult<MetadataEntry> {
        let mut rows = self.rows.entry(entry.track_uri.clone()).or_default();
        if let Some(last) = rows.back() {
            entry.added_at = entry.added_at.max(last.added_at + 1);
        }
        rows.push_back(entry.clone());
        Ok(entry)
    }

    async fn delete_oldest(&self, uri: &str) -> StoreResult<Option<MetadataEntry>> {
        let removed = self.rows.get_mut(uri).and_then(|mut rows| rows.pop_front());
        self.rows.remove_if(uri, |_, rows| rows.is_empty());
        Ok(removed)
    }

    async fn delete(&self, uri: &str, added_at: u64) -> StoreResult<bool> {
        let removed = self
            .rows
            .get_mut(uri)
            .map(|mut rows| {
                let before = rows.len();
                rows.retain(|r| r.added_at != added_at);
                rows.len() != before
            })
            .unwrap_or(false);
        self.rows.remove_if(uri, |_, rows| rows.is_empty());
        Ok(removed)
    }

    async fn increment_shield(
        &self,
        uri: &str,
        added_at: Option<u64>,
    ) -> StoreResult<Option<MetadataEntry>> {
        let Some(mut rows) = self.rows.get_mut(uri) else {
            return Ok(None);
        };
        let row = match added_at {
            Some(ts) => rows.iter_mut().find(|r| r.added_at == ts),
            None => rows.front_mut(),
        };
        Ok(row.map(|r| {
            r.shield_count += 1;
            r.clone()
        }))
    }

    async fn consume_shield(&self, uri: &str, added_at: u64) -> StoreResult<Option<u32>> {
        let Some(mut rows) = self.rows.get_mut(uri) else {
            return Ok(None);
        };
        Ok(rows
            .iter_mut()
            .find(|r| r.added_at == added_at && r.shield_count > 0)
            .map(|r| {
                r.shield_count -= 1;
                r.shield_count
            }))
    }
}

#[async_trait]
impl BanStore for InMemoryStore {
    async fn is_banned(&self, uri: &str) -> StoreResult<bool> {
        Ok(self.bans.contains_key(uri))
    }

    async fn insert_ban(&self, ban: BannedTrack) -> StoreResult<()> {
        self.bans.insert(ban.track_uri.clone(), ban);
        Ok(())
    }

    async fn list_bans(&self) -> StoreResult<Vec<BannedTrack>> {
        let mut bans: Vec<_> = self.bans.iter().map(|b| b.value().clone()).collect();
        bans.sort_by(|a, b| b.banned_at.cmp(&a.banned_at));
        Ok(bans)
    }
}
