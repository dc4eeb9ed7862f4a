//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{PresenceEvent, QueueEvent, VoteEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to clients (WebSocket, SSE, logs).
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.emitter.emit_queue(QueueEvent::QueueUpdate(state));
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a queue or now-playing event.
    fn emit_queue(&self, event: QueueEvent);

    /// Emits a ban vote event.
    fn emit_vote(&self, event: VoteEvent);

    /// Emits a presence event.
    fn emit_presence(&self, event: PresenceEvent);
}

/// No-op emitter for testing.
///
/// Events are silently discarded.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_queue(&self, _event: QueueEvent) {}

    fn emit_vote(&self, _event: VoteEvent) {}

    fn emit_presence(&self, _event: PresenceEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Attach it to the bridge as the external
/// emitter to trace event flow.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_queue(&self, event: QueueEvent) {
        tracing::debug!(?event, "queue_event");
    }

    fn emit_vote(&self, event: VoteEvent) {
        tracing::debug!(?event, "vote_event");
    }

    fn emit_presence(&self, event: PresenceEvent) {
        tracing::debug!(?event, "presence_event");
    }
}
