//! WebSocket connection tracking and presence.
//!
//! - `WsConnectionManager`: Tracks active connections and who they belong to
//! - `ConnectionGuard`: RAII guard for automatic cleanup on disconnect
//!
//! The online count used by ban votes is the number of distinct identified
//! users, so one student with two tabs open counts once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, PresenceEvent};
use crate::utils::now_millis;

/// Per-connection state.
#[derive(Default)]
struct ConnectionState {
    /// Set once the client sends `IDENTIFY`.
    user_id: Option<String>,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe and designed for concurrent access from multiple
/// WebSocket handlers. Uses hierarchical cancellation tokens for
/// efficient force-close of all connections.
pub struct WsConnectionManager {
    /// Active connections: connection_id -> ConnectionState
    connections: DashMap<String, ConnectionState>,
    /// Counter for generating unique connection IDs.
    next_id: AtomicU64,
    /// Global cancellation token - when cancelled, all connections close.
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
    /// Receives `userCount` changes.
    emitter: Arc<dyn EventEmitter>,
    /// Last broadcast online count. Serializes count announcements.
    last_count: Mutex<u32>,
}

impl WsConnectionManager {
    /// Creates a new connection manager.
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
            emitter,
            last_count: Mutex::new(0),
        }
    }

    /// Registers a new connection and returns a guard for RAII cleanup.
    ///
    /// The returned `ConnectionGuard` will automatically unregister the
    /// connection when dropped.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections
            .insert(conn_id.clone(), ConnectionState::default());
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    /// Associates a connection with a user. Re-identifying replaces the user.
    pub fn identify(&self, conn_id: &str, user_id: &str) {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return;
        }
        if let Some(mut conn) = self.connections.get_mut(conn_id) {
            conn.user_id = Some(user_id.to_string());
        } else {
            return;
        }
        log::debug!("[WS] {} identified as {}", conn_id, user_id);
        self.announce_count();
    }

    /// User bound to a connection, if it identified.
    pub fn user_of(&self, conn_id: &str) -> Option<String> {
        self.connections
            .get(conn_id)
            .and_then(|conn| conn.user_id.clone())
    }

    /// Unregisters a connection by ID.
    fn unregister(&self, id: &str) {
        if let Some((_, state)) = self.connections.remove(id) {
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
            if state.user_id.is_some() {
                self.announce_count();
            }
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of distinct identified users.
    #[must_use]
    pub fn online_count(&self) -> u32 {
        let users: HashSet<String> = self
            .connections
            .iter()
            .filter_map(|conn| conn.user_id.clone())
            .collect();
        u32::try_from(users.len()).unwrap_or(u32::MAX)
    }

    /// Broadcasts `userCount` if the online count moved.
    fn announce_count(&self) {
        let mut last = self.last_count.lock();
        let count = self.online_count();
        if *last == count {
            return;
        }
        *last = count;
        log::info!("[WS] Online users: {}", count);
        self.emitter.emit_presence(PresenceEvent::UserCount {
            count,
            timestamp: now_millis(),
        });
    }

    /// Force-closes all connections.
    ///
    /// This cancels the global token, which signals all connection handlers
    /// to terminate gracefully. After cancellation, a fresh token is created
    /// so new connections can still be accepted.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

/// RAII guard that unregisters a connection when dropped.
///
/// This ensures connections are always cleaned up, even if the handler
/// panics or exits early.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    /// Token for this specific connection - cancelled on force-close.
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    /// Returns the connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cancellation token for this connection.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::services::test_fixtures::RecordingEmitter;

    fn manager() -> (Arc<WsConnectionManager>, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::new());
        let manager = Arc::new(WsConnectionManager::new(
            Arc::clone(&emitter) as Arc<dyn EventEmitter>
        ));
        (manager, emitter)
    }

    #[test]
    fn online_count_is_distinct_users() {
        let (manager, emitter) = manager();
        let a1 = manager.register();
        let a2 = manager.register();
        let b = manager.register();
        let _anon = manager.register();

        manager.identify(a1.id(), "alice");
        manager.identify(a2.id(), "alice");
        manager.identify(b.id(), "bob");

        assert_eq!(manager.connection_count(), 4);
        assert_eq!(manager.online_count(), 2);
        // alice's second tab did not change the count
        assert_eq!(emitter.count("userCount"), 2);
    }

    #[test]
    fn disconnect_announces_new_count() {
        let (manager, emitter) = manager();
        let a = manager.register();
        let b = manager.register();
        manager.identify(a.id(), "alice");
        manager.identify(b.id(), "bob");
        emitter.clear();

        drop(b);
        assert_eq!(manager.online_count(), 1);
        assert_eq!(emitter.names(), vec!["userCount"]);

        let anon = manager.register();
        drop(anon);
        assert_eq!(emitter.count("userCount"), 1);
    }

    #[test]
    fn blank_identity_is_ignored() {
        let (manager, _) = manager();
        let conn = manager.register();
        manager.identify(conn.id(), "   ");
        assert_eq!(manager.user_of(conn.id()), None);
        assert_eq!(manager.online_count(), 0);
    }

    #[test]
    fn close_all_cancels_existing_connections_only() {
        let manager = Arc::new(WsConnectionManager::new(Arc::new(NoopEventEmitter)));
        let old = manager.register();
        assert_eq!(manager.close_all(), 1);
        assert!(old.cancel_token().is_cancelled());

        let fresh = manager.register();
        assert!(!fresh.cancel_token().is_cancelled());
    }
}
