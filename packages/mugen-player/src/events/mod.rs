//! Events emitted by the player core to the rest of the application.
//!
//! This module provides:
//! - [`EventEmitter`] trait the orchestrator emits through
//! - [`BroadcastEventBridge`] for fan-out to any number of listeners
//! - Event types for player and configuration changes

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

#[cfg(test)]
pub(crate) use emitter::tests::RecordingEmitter;

use serde::Serialize;

use crate::state::{PlayerKind, PlayerStatus};

/// Events broadcast to listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Playback and lifecycle events.
    Player(PlayerEvent),

    /// Configuration values changed by the player itself.
    Config(ConfigEvent),
}

/// Events related to playback and player lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    /// The player status snapshot changed (for UI).
    StateChanged {
        status: Box<PlayerStatus>,
    },
    /// The current song is about to end; announce the next one.
    NextSongSoon,
    /// The poll for the next song must be closed.
    PollEnded,
    /// Position tick while a quiz game drives the display.
    GamePosition {
        /// Seconds into the song.
        position: f64,
        /// Song duration in seconds.
        duration: f64,
    },
    /// A player failed to start after every attempt.
    StartupFailed {
        instance: PlayerKind,
        error: String,
        /// Stable error code.
        code: &'static str,
    },
    /// A player process was recreated (crash recovery or reconfiguration).
    Recreated {
        instance: PlayerKind,
    },
}

/// Events related to configuration changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConfigEvent {
    /// Fullscreen was toggled from the player window.
    FullscreenChanged {
        fullscreen: bool,
    },
}
