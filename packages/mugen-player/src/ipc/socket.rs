//! Platform socket handling for the player IPC server.
//!
//! - Unix: Unix domain socket at a filesystem path
//! - Windows: named pipe `\\.\pipe\<name>`

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{IpcError, IpcResult};

pub(crate) type IpcReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type IpcWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Builds an OS-appropriate IPC address with a random numeric suffix.
///
/// The suffix keeps repeated launches (and the main/monitor pair) from
/// colliding on a stale socket.
#[must_use]
pub fn ipc_socket_path(label: &str, temp_dir: &Path) -> String {
    let suffix: u32 = rand::random::<u32>() % 1_000_000;
    let name = format!("mugen-mpv-{}-{}", label, suffix);

    if cfg!(windows) {
        format!(r"\\.\pipe\{}", name)
    } else {
        temp_dir
            .join(format!("{}.sock", name))
            .to_string_lossy()
            .into_owned()
    }
}

/// Opens one connection to the player's IPC server.
#[cfg(unix)]
pub(crate) async fn connect(path: &str) -> IpcResult<(IpcReader, IpcWriter)> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| IpcError::Connect {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    let (read_half, write_half) = stream.into_split();
    Ok((Box::new(read_half), Box::new(write_half)))
}

/// Opens one connection to the player's IPC server.
#[cfg(windows)]
pub(crate) async fn connect(path: &str) -> IpcResult<(IpcReader, IpcWriter)> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
        .open(path)
        .map_err(|e| IpcError::Connect {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    let (read_half, write_half) = tokio::io::split(client);
    Ok((Box::new(read_half), Box::new(write_half)))
}
