//! SQLite-backed store.
//!
//! All statements run on the blocking pool; the connection sits behind a
//! mutex shared with those workers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::spawn_blocking;

use super::{BanStore, BannedTrack, MetadataEntry, MetadataStore, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_metadata (
    track_uri    TEXT    NOT NULL,
    added_at     INTEGER NOT NULL,
    added_by     TEXT    NOT NULL,
    is_anonymous INTEGER NOT NULL DEFAULT 0,
    shield_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (track_uri, added_at)
);
CREATE TABLE IF NOT EXISTS banned_tracks (
    track_uri    TEXT    PRIMARY KEY,
    track_name   TEXT    NOT NULL,
    track_artist TEXT    NOT NULL,
    banned_at    INTEGER NOT NULL,
    yes_votes    INTEGER NOT NULL,
    no_votes     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_banned_at ON banned_tracks(banned_at);
";

/// Durable store in a single SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        log::info!("[Store] Opened SQLite database at {}", path.display());
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await?
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetadataEntry> {
    Ok(MetadataEntry {
        track_uri: row.get(0)?,
        added_at: row.get::<_, i64>(1)? as u64,
        added_by: row.get(2)?,
        is_anonymous: row.get(3)?,
        shield_count: row.get::<_, i64>(4)? as u32,
    })
}

const ENTRY_COLUMNS: &str = "track_uri, added_at, added_by, is_anonymous, shield_count";

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn find_by_uris(&self, uris: &[String]) -> StoreResult<Vec<MetadataEntry>> {
        let mut uris = uris.to_vec();
        uris.sort();
        uris.dedup();
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; uris.len()].join(", ");
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_metadata
                 WHERE track_uri IN ({placeholders})
                 ORDER BY track_uri, added_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(uris.iter()), row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn insert(&self, mut entry: MetadataEntry) -> StoreResult<MetadataEntry> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let last: Option<i64> = tx.query_row(
                "SELECT MAX(added_at) FROM queue_metadata WHERE track_uri = ?1",
                params![entry.track_uri],
                |row| row.get(0),
            )?;
            if let Some(last) = last {
                entry.added_at = entry.added_at.max(last as u64 + 1);
            }
            tx.execute(
                "INSERT INTO queue_metadata (track_uri, added_at, added_by, is_anonymous, shield_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.track_uri,
                    entry.added_at as i64,
                    entry.added_by,
                    entry.is_anonymous,
                    entry.shield_count as i64,
                ],
            )?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn delete_oldest(&self, uri: &str) -> StoreResult<Option<MetadataEntry>> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let oldest = tx
                .query_row(
                    &format!(
                        "SELECT {ENTRY_COLUMNS} FROM queue_metadata
                         WHERE track_uri = ?1 ORDER BY added_at ASC LIMIT 1"
                    ),
                    params![uri],
                    row_to_entry,
                )
                .optional()?;
            if let Some(ref row) = oldest {
                tx.execute(
                    "DELETE FROM queue_metadata WHERE track_uri = ?1 AND added_at = ?2",
                    params![row.track_uri, row.added_at as i64],
                )?;
            }
            tx.commit()?;
            Ok(oldest)
        })
        .await
    }

    async fn delete(&self, uri: &str, added_at: u64) -> StoreResult<bool> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM queue_metadata WHERE track_uri = ?1 AND added_at = ?2",
                params![uri, added_at as i64],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn increment_shield(
        &self,
        uri: &str,
        added_at: Option<u64>,
    ) -> StoreResult<Option<MetadataEntry>> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let target: Option<i64> = match added_at {
                Some(ts) => tx
                    .query_row(
                        "SELECT added_at FROM queue_metadata WHERE track_uri = ?1 AND added_at = ?2",
                        params![uri, ts as i64],
                        |row| row.get(0),
                    )
                    .optional()?,
                None => tx
                    .query_row(
                        "SELECT MIN(added_at) FROM queue_metadata WHERE track_uri = ?1",
                        params![uri],
                        |row| row.get(0),
                    )?,
            };
            let Some(ts) = target else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE queue_metadata SET shield_count = shield_count + 1
                 WHERE track_uri = ?1 AND added_at = ?2",
                params![uri, ts],
            )?;
            let row = tx.query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM queue_metadata WHERE track_uri = ?1 AND added_at = ?2"
                ),
                params![uri, ts],
                row_to_entry,
            )?;
            tx.commit()?;
            Ok(Some(row))
        })
        .await
    }

    async fn consume_shield(&self, uri: &str, added_at: u64) -> StoreResult<Option<u32>> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            let remaining: Option<i64> = conn
                .query_row(
                    "UPDATE queue_metadata SET shield_count = shield_count - 1
                     WHERE track_uri = ?1 AND added_at = ?2 AND shield_count > 0
                     RETURNING shield_count",
                    params![uri, added_at as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(remaining.map(|n| n as u32))
        })
        .await
    }
}

#[async_trait]
impl BanStore for SqliteStore {
    async fn is_banned(&self, uri: &str) -> StoreResult<bool> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM banned_tracks WHERE track_uri = ?1",
                    params![uri],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn insert_ban(&self, ban: BannedTrack) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO banned_tracks
                 (track_uri, track_name, track_artist, banned_at, yes_votes, no_votes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ban.track_uri,
                    ban.track_name,
                    ban.track_artist,
                    ban.banned_at as i64,
                    ban.yes_votes as i64,
                    ban.no_votes as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_bans(&self) -> StoreResult<Vec<BannedTrack>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT track_uri, track_name, track_artist, banned_at, yes_votes, no_votes
                 FROM banned_tracks ORDER BY banned_at DESC",
            )?;
            let bans = stmt
                .query_map([], |row| {
                    Ok(BannedTrack {
                        track_uri: row.get(0)?,
                        track_name: row.get(1)?,
                        track_artist: row.get(2)?,
                        banned_at: row.get::<_, i64>(3)? as u64,
                        yes_votes: row.get::<_, i64>(4)? as u32,
                        no_votes: row.get::<_, i64>(5)? as u32,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(bans)
        })
        .await
    }
}
