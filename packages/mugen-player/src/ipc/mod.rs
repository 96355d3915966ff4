//! JSON IPC transport to the player process.
//!
//! The orchestrator talks to [`PlayerTransport`] only, so tests substitute an
//! in-memory transport and production code plugs in [`MpvTransport`] through
//! [`TransportFactory`].

mod messages;
mod observations;
mod pending;
mod socket;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::IpcResult;
use crate::runtime::TaskSpawner;

pub use messages::{encode_command, IncomingMessage, MessageDecoder, TransportEvent};
pub use observations::{Acquired, ObservationStore, Released};
pub use pending::PendingRequests;
pub use socket::ipc_socket_path;
pub use transport::{MpvTransport, TransportOptions};

/// Connection to one running player process.
#[async_trait]
pub trait PlayerTransport: Send + Sync {
    /// Spawns the process and connects both sockets.
    ///
    /// Fails with `AlreadyRunning` when a live process exists.
    async fn start(&self) -> IpcResult<()>;

    /// Asks the process to quit and tears the connection down.
    async fn stop(&self) -> IpcResult<()>;

    /// Sends one command and resolves with the response `data`.
    async fn send(&self, command: Value) -> IpcResult<Value>;

    /// Starts (or shares) an observation of `name`.
    async fn observe_property(&self, name: &str) -> IpcResult<()>;

    /// Releases one observation of `name`.
    async fn unobserve_property(&self, name: &str) -> IpcResult<()>;

    fn is_running(&self) -> bool;

    /// Receives property changes, player events and lifecycle notifications.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Creates transports for (re)started players.
///
/// Transports run their socket readers on `spawner`.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        options: TransportOptions,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<dyn PlayerTransport>;
}

/// Factory producing real [`MpvTransport`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MpvTransportFactory;

impl TransportFactory for MpvTransportFactory {
    fn create(
        &self,
        options: TransportOptions,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<dyn PlayerTransport> {
        Arc::new(MpvTransport::new(options, spawner))
    }
}
