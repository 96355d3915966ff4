//! Event emitter abstraction for decoupling the player core from delivery.
//!
//! The orchestrator depends on the [`EventEmitter`] trait rather than concrete
//! channels, so hosts can route events to a UI, a socket, or nowhere.

use super::{ConfigEvent, PlayerEvent};

/// Trait for emitting player events without knowledge of transport.
///
/// Emission is synchronous and must not block; implementations hand events
/// off (channel send, log line) and return.
pub trait EventEmitter: Send + Sync {
    /// Emits a playback or lifecycle event.
    fn emit_player(&self, event: PlayerEvent);

    /// Emits a configuration change made by the player.
    fn emit_config(&self, event: ConfigEvent);
}

/// No-op emitter for headless use or testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_player(&self, _event: PlayerEvent) {}

    fn emit_config(&self, _event: ConfigEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_player(&self, event: PlayerEvent) {
        tracing::debug!(?event, "player_event");
    }

    fn emit_config(&self, event: ConfigEvent) {
        tracing::debug!(?event, "config_event");
    }
}
