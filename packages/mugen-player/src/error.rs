//! Centralized error types for the player control core.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Separates transport (IPC) failures from orchestrator failures
//! - Exposes stable machine-readable codes for UI state and telemetry

use std::time::Duration;

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Errors raised by the IPC transport that owns the player process.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IpcError {
    /// `start()` was called while a process is already live.
    ///
    /// This is a recoverable condition, not a crash.
    #[error("Player process is already running")]
    AlreadyRunning,

    /// An operation needing a live process was called while stopped.
    #[error("Player process is not running")]
    NotRunning,

    /// The player binary could not be launched.
    #[error("Failed to spawn player process: {0}")]
    Spawn(String),

    /// The process exited before signaling IPC readiness.
    #[error("Player process exited before becoming ready (exit code: {0:?})")]
    ProcessExited(Option<i32>),

    /// The process reported it could not bind its IPC socket or pipe.
    #[error("Player could not bind its IPC server: {0}")]
    BindFailed(String),

    /// The process did not signal readiness within the startup window.
    #[error("Player did not become ready within {0:?}")]
    StartupTimeout(Duration),

    /// Connecting to the IPC socket failed.
    #[error("Failed to connect to IPC socket {path}: {reason}")]
    Connect { path: String, reason: String },

    /// Socket read/write failure while a command was in flight.
    #[error("IPC I/O error: {0}")]
    Io(String),

    /// The connection closed before a response arrived.
    #[error("IPC connection closed before a response arrived")]
    ConnectionClosed,

    /// The player answered with a non-success status.
    #[error("Player rejected command {command}: {error}")]
    Command { command: String, error: String },

    /// `unobserve_property` was called for a property with no observation.
    #[error("Property is not observed: {0}")]
    NotObserved(String),

    /// A message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An opt-in per-request timeout elapsed.
    #[error("No response for request {request_id} within {timeout_ms}ms")]
    Timeout { request_id: u64, timeout_ms: u64 },
}

impl IpcError {
    /// Returns true for the benign "already running" condition.
    #[must_use]
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning)
    }
}

impl ErrorCode for IpcError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::Spawn(_) => "spawn_failed",
            Self::ProcessExited(_) => "process_exited",
            Self::BindFailed(_) => "ipc_bind_failed",
            Self::StartupTimeout(_) => "startup_timeout",
            Self::Connect { .. } => "ipc_connect_failed",
            Self::Io(_) => "ipc_io_error",
            Self::ConnectionClosed => "connection_closed",
            Self::Command { .. } => "command_rejected",
            Self::NotObserved(_) => "property_not_observed",
            Self::Serialization(_) => "serialization_error",
            Self::Timeout { .. } => "request_timeout",
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by the player orchestrator.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// A transport operation failed.
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// Every start attempt failed.
    #[error("Player failed to start after {attempts} attempt(s): {last}")]
    StartupFailed { attempts: u32, last: IpcError },

    /// An operation was called before `init()`.
    #[error("Player is not initialized")]
    NotInitialized,

    /// An operation was called after `destroy()`.
    #[error("Player has been destroyed")]
    Destroyed,

    /// The playlist collaborator failed to perform an action.
    #[error("Playlist action failed: {0}")]
    Playlist(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The media item handed to `play()` is unusable.
    #[error("Invalid media: {0}")]
    InvalidMedia(String),
}

impl ErrorCode for PlayerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Ipc(e) => e.code(),
            Self::StartupFailed { .. } => "startup_failed",
            Self::NotInitialized => "not_initialized",
            Self::Destroyed => "destroyed",
            Self::Playlist(_) => "playlist_error",
            Self::Configuration(_) => "configuration_error",
            Self::InvalidMedia(_) => "invalid_media",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Result alias for transport operations.
pub type IpcResult<T> = Result<T, IpcError>;

/// Result alias for orchestrator operations.
pub type PlayerResult<T> = Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_is_distinguished() {
        assert!(IpcError::AlreadyRunning.is_already_running());
        assert!(!IpcError::NotRunning.is_already_running());
    }

    #[test]
    fn startup_errors_have_stable_codes() {
        assert_eq!(IpcError::ProcessExited(Some(1)).code(), "process_exited");
        assert_eq!(IpcError::BindFailed("busy".into()).code(), "ipc_bind_failed");
        assert_eq!(
            IpcError::StartupTimeout(Duration::from_secs(10)).code(),
            "startup_timeout"
        );
    }

    #[test]
    fn player_error_forwards_ipc_code() {
        let err = PlayerError::from(IpcError::ConnectionClosed);
        assert_eq!(err.code(), "connection_closed");

        let err = PlayerError::StartupFailed {
            attempts: 3,
            last: IpcError::StartupTimeout(Duration::from_secs(10)),
        };
        assert_eq!(err.code(), "startup_failed");
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
