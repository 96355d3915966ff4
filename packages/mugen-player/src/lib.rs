//! Mugen Player - media player control core for Karaoke Mugen.
//!
//! This crate drives one or two mpv processes over their JSON IPC socket and
//! turns their property changes into player state, notifications and playlist
//! advances. It is designed to be embedded by the application server and by
//! the headless `player-host` binary.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`ipc`]: Process transport (spawn, socket pair, request correlation, observations)
//! - [`state_adapter`]: Reference-counted property streams over the transport
//! - [`filter_graph`]: `lavfi-complex` generation and capability negotiation
//! - [`orchestrator`]: Player lifecycle, event binding and playback commands
//! - [`state`]: Player configuration and the state registry
//! - [`launch`]: Launch arguments and window geometry
//! - [`events`]: Events emitted to the application
//! - [`context`]: Collaborators provided by the application
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`PlayerTransport`](ipc::PlayerTransport): Process and IPC ownership
//! - [`TransportFactory`](ipc::TransportFactory): Fresh transports on (re)creation
//! - [`EventEmitter`](events::EventEmitter): Emitting player events
//! - [`PlaylistControl`](context::PlaylistControl): Playlist advance
//! - [`DisplayDetector`](context::DisplayDetector): Screen resolution
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod events;
pub mod filter_graph;
pub mod ipc;
pub mod launch;
pub mod orchestrator;
pub mod protocol_constants;
pub mod runtime;
pub mod state;
pub mod state_adapter;
pub mod utils;

// Re-export commonly used types at the crate root
pub use context::{DisplayDetector, FixedDisplay, NoDisplayDetector, NoPlaylist, PlaylistControl};
pub use error::{ErrorCode, IpcError, IpcResult, PlayerError, PlayerResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, ConfigEvent, EventEmitter, LoggingEventEmitter,
    NoopEventEmitter, PlayerEvent,
};
pub use filter_graph::{generate_composition, Composition, MediaCapabilities, Platform};
pub use ipc::{MpvTransport, MpvTransportFactory, PlayerTransport, TransportEvent, TransportFactory};
pub use orchestrator::{OsdAlignment, Player, PlayerDeps, PlayerPhase, Players, RemoteCommand};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{
    MediaType, PlaybackState, PlayerConfig, PlayerKind, PlayerState, PlayerStateReader,
    PlayerStatus, SongDescriptor,
};
pub use state_adapter::PlayerStateAdapter;
pub use utils::now_millis;
