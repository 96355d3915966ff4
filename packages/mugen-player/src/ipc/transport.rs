//! Player process transport.
//!
//! [`MpvTransport`] owns one child player process and two socket connections to
//! its IPC server:
//!
//! - the **observe** channel carries property observation traffic and is the
//!   only source of events, so a blocked command never stalls property delivery
//! - the **command** channel carries regular commands
//!
//! Each channel has its own pending request table. Responses are matched by
//! request id only, so concurrent commands may resolve out of send order.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use super::messages::{encode_command, IncomingMessage, MessageDecoder, TransportEvent};
use super::observations::{Acquired, ObservationStore, Released};
use super::pending::PendingRequests;
use super::socket::{connect, IpcReader, IpcWriter};
use super::PlayerTransport;
use crate::error::{IpcError, IpcResult};
use crate::protocol_constants::{
    BASELINE_FLAGS, IPC_BIND_FAILURE_MARKER, IPC_READY_MARKER, QUIT_GRACE_PERIOD,
    RESPONSE_SUCCESS, STARTUP_TIMEOUT, TRANSPORT_EVENT_CAPACITY,
};
use crate::runtime::TaskSpawner;

/// Launch parameters for one transport connection.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Short name used in log lines ("main", "monitor").
    pub label: String,
    /// Player binary.
    pub binary: PathBuf,
    /// IPC socket path or pipe name handed to `--input-ipc-server`.
    pub socket_path: String,
    /// Caller-supplied arguments, placed before the baseline flags.
    pub args: Vec<String>,
    /// Window for the process to signal IPC readiness.
    pub startup_timeout: Duration,
    /// Optional bound on every command round-trip. `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// How long `stop()` waits for the process to exit before killing it.
    pub quit_grace: Duration,
}

impl TransportOptions {
    pub fn new(label: impl Into<String>, binary: impl Into<PathBuf>, socket_path: String) -> Self {
        Self {
            label: label.into(),
            binary: binary.into(),
            socket_path,
            args: Vec::new(),
            startup_timeout: STARTUP_TIMEOUT,
            command_timeout: None,
            quit_grace: QUIT_GRACE_PERIOD,
        }
    }

    /// Full argument list: caller arguments, baseline flags, IPC server flag.
    #[must_use]
    pub fn command_line(&self) -> Vec<String> {
        let mut line = self.args.clone();
        line.extend(BASELINE_FLAGS.iter().map(|f| (*f).to_string()));
        line.push(format!("--input-ipc-server={}", self.socket_path));
        line
    }
}

/// One socket connection with its own pending request table.
struct IpcChannel {
    name: &'static str,
    writer: Mutex<IpcWriter>,
    pending: PendingRequests,
    /// Set by the reader before it fails the pending table for good.
    closed: AtomicBool,
}

impl IpcChannel {
    fn new(name: &'static str, writer: IpcWriter) -> Self {
        Self {
            name,
            writer: Mutex::new(writer),
            pending: PendingRequests::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the channel closed and fails every request still waiting.
    fn close(&self, error: &IpcError) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.fail_all(error)
    }

    async fn write_line(&self, line: &str) -> IpcResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn request(
        &self,
        request_id: u64,
        command: &Value,
        timeout: Option<Duration>,
    ) -> IpcResult<Value> {
        let line = encode_command(command, request_id)?;
        let rx = self.pending.register(request_id);

        // A reader that already closed will never resolve this entry
        if self.is_closed() {
            self.pending.forget(request_id);
            return Err(IpcError::ConnectionClosed);
        }

        if let Err(e) = self.write_line(&line).await {
            self.pending.forget(request_id);
            return Err(e);
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.forget(request_id);
                    return Err(IpcError::Timeout {
                        request_id,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        match outcome.map_err(|_| IpcError::ConnectionClosed)? {
            Err(IpcError::Command { error, .. }) => Err(IpcError::Command {
                command: command.to_string(),
                error,
            }),
            other => other,
        }
    }
}

#[derive(Clone)]
struct Channels {
    observer: Arc<IpcChannel>,
    command: Arc<IpcChannel>,
}

/// A live process and the token that stops its reader tasks.
struct Session {
    child: Child,
    cancel: CancellationToken,
}

/// State shared with the reader tasks.
struct Shared {
    label: String,
    running: AtomicBool,
    shutdown_seen: AtomicBool,
    stopping: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
    observations: ObservationStore,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        log::trace!("[Transport:{}] Event: {}", self.label, event.kind());
        if self.events.send(event).is_err() {
            log::trace!("[Transport:{}] No event subscribers", self.label);
        }
    }

    fn on_observer_closed(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.observations.clear();

        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        if self.shutdown_seen.load(Ordering::SeqCst) {
            log::info!(
                "[Transport:{}] Observation socket closed after player shutdown",
                self.label
            );
            return;
        }
        if was_running {
            log::warn!(
                "[Transport:{}] Observation socket closed unexpectedly, player crashed",
                self.label
            );
            self.emit(TransportEvent::Crashed);
        }
    }
}

/// IPC client owning one player process.
pub struct MpvTransport {
    options: TransportOptions,
    spawner: Arc<dyn TaskSpawner>,
    shared: Arc<Shared>,
    next_request_id: AtomicU64,
    session: Mutex<Option<Session>>,
    channels: RwLock<Option<Channels>>,
}

impl MpvTransport {
    /// Creates a stopped transport whose reader tasks run on `spawner`.
    #[must_use]
    pub fn new(options: TransportOptions, spawner: Arc<dyn TaskSpawner>) -> Self {
        let (events, _) = broadcast::channel(TRANSPORT_EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                label: options.label.clone(),
                running: AtomicBool::new(false),
                shutdown_seen: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                events,
                observations: ObservationStore::new(),
            }),
            options,
            spawner,
            next_request_id: AtomicU64::new(1),
            session: Mutex::new(None),
            channels: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Number of subscribers sharing the observation of `name`.
    #[must_use]
    pub fn observers_of(&self, name: &str) -> usize {
        self.shared.observations.subscribers(name)
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn live_channels(&self) -> IpcResult<Channels> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(IpcError::NotRunning);
        }
        self.channels.read().clone().ok_or(IpcError::NotRunning)
    }

    async fn teardown(&self, mut session: Session) {
        session.cancel.cancel();
        *self.channels.write() = None;
        self.shared.observations.clear();

        match tokio::time::timeout(self.options.quit_grace, session.child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!(
                    "[Transport:{}] Player process exited: {}",
                    self.options.label,
                    status
                );
            }
            _ => {
                log::warn!(
                    "[Transport:{}] Player process did not exit in time, killing it",
                    self.options.label
                );
                if let Err(e) = session.child.kill().await {
                    log::debug!("[Transport:{}] Kill failed: {}", self.options.label, e);
                }
            }
        }
    }
}

#[async_trait]
impl PlayerTransport for MpvTransport {
    async fn start(&self) -> IpcResult<()> {
        let mut session = self.session.lock().await;
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(IpcError::AlreadyRunning);
        }
        if let Some(stale) = session.take() {
            log::debug!(
                "[Transport:{}] Cleaning up previous process before restart",
                self.options.label
            );
            self.teardown(stale).await;
        }

        self.shared.shutdown_seen.store(false, Ordering::SeqCst);
        self.shared.stopping.store(false, Ordering::SeqCst);
        self.shared.observations.clear();

        let command_line = self.options.command_line();
        log::info!(
            "[Transport:{}] Starting {} {}",
            self.options.label,
            self.options.binary.display(),
            command_line.join(" ")
        );

        let mut child = Command::new(&self.options.binary)
            .args(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IpcError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IpcError::Spawn("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| IpcError::Spawn("stderr was not captured".into()))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let readiness = tokio::time::timeout(
            self.options.startup_timeout,
            wait_for_ready(&mut child, &mut stdout_lines, &mut stderr_lines),
        )
        .await
        .unwrap_or(Err(IpcError::StartupTimeout(self.options.startup_timeout)));

        if let Err(e) = readiness {
            log::warn!("[Transport:{}] Startup failed: {}", self.options.label, e);
            if let Err(kill_err) = child.start_kill() {
                log::trace!("[Transport:{}] Kill failed: {}", self.options.label, kill_err);
            }
            return Err(e);
        }

        self.spawner
            .spawn(drain_output(stdout_lines, self.options.label.clone(), "stdout"));
        self.spawner
            .spawn(drain_output(stderr_lines, self.options.label.clone(), "stderr"));

        let connected = async {
            let observer = connect(&self.options.socket_path).await?;
            let command = connect(&self.options.socket_path).await?;
            Ok::<_, IpcError>((observer, command))
        }
        .await;
        let ((observer_reader, observer_writer), (command_reader, command_writer)) =
            match connected {
                Ok(halves) => halves,
                Err(e) => {
                    log::warn!("[Transport:{}] {}", self.options.label, e);
                    if let Err(kill_err) = child.start_kill() {
                        log::trace!("[Transport:{}] Kill failed: {}", self.options.label, kill_err);
                    }
                    return Err(e);
                }
            };

        let channels = Channels {
            observer: Arc::new(IpcChannel::new("observe", observer_writer)),
            command: Arc::new(IpcChannel::new("command", command_writer)),
        };
        let cancel = CancellationToken::new();

        self.spawner.spawn(read_loop(
            observer_reader,
            Arc::clone(&channels.observer),
            Arc::clone(&self.shared),
            true,
            cancel.clone(),
        ));
        self.spawner.spawn(read_loop(
            command_reader,
            Arc::clone(&channels.command),
            Arc::clone(&self.shared),
            false,
            cancel.clone(),
        ));

        *self.channels.write() = Some(channels);
        self.shared.running.store(true, Ordering::SeqCst);
        *session = Some(Session { child, cancel });

        log::info!(
            "[Transport:{}] Connected to {}",
            self.options.label,
            self.options.socket_path
        );
        Ok(())
    }

    async fn stop(&self) -> IpcResult<()> {
        let mut session = self.session.lock().await;
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(IpcError::NotRunning);
        }

        self.shared.stopping.store(true, Ordering::SeqCst);

        let channels = self.channels.read().clone();
        if let Some(channels) = channels {
            // The player closes the socket on quit, so no response is awaited
            let line = encode_command(&json!(["quit"]), self.next_id())?;
            if let Err(e) = channels.command.write_line(&line).await {
                log::debug!("[Transport:{}] Quit command failed: {}", self.options.label, e);
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.emit(TransportEvent::Stopped);

        if let Some(live) = session.take() {
            self.teardown(live).await;
        }

        log::info!("[Transport:{}] Stopped", self.options.label);
        Ok(())
    }

    async fn send(&self, command: Value) -> IpcResult<Value> {
        let channels = self.live_channels()?;
        let request_id = self.next_id();
        log::trace!(
            "[Transport:{}] -> #{} {}",
            self.options.label,
            request_id,
            command
        );
        channels
            .command
            .request(request_id, &command, self.options.command_timeout)
            .await
    }

    async fn observe_property(&self, name: &str) -> IpcResult<()> {
        let channels = self.live_channels()?;
        match self.shared.observations.acquire(name) {
            Acquired::Shared => Ok(()),
            // Share the outcome of the first subscriber's request
            Acquired::Pending(outcome) => outcome
                .await
                .unwrap_or(Err(IpcError::ConnectionClosed)),
            Acquired::First(id) => {
                let request_id = self.next_id();
                let command = json!(["observe_property", id, name]);
                match channels
                    .observer
                    .request(request_id, &command, self.options.command_timeout)
                    .await
                {
                    Ok(_) => {
                        self.shared.observations.confirm(name, id);
                        log::debug!(
                            "[Transport:{}] Observing {} (id {})",
                            self.options.label,
                            name,
                            id
                        );
                        Ok(())
                    }
                    Err(e) => {
                        self.shared.observations.rollback(name, id, &e);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn unobserve_property(&self, name: &str) -> IpcResult<()> {
        let channels = self.live_channels()?;
        match self.shared.observations.release(name)? {
            Released::Shared => Ok(()),
            Released::Last(id) => {
                let request_id = self.next_id();
                let command = json!(["unobserve_property", id]);
                channels
                    .observer
                    .request(request_id, &command, self.options.command_timeout)
                    .await?;
                log::debug!(
                    "[Transport:{}] Stopped observing {} (id {})",
                    self.options.label,
                    name,
                    id
                );
                Ok(())
            }
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for MpvTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Reads stdout/stderr until the readiness marker, a bind failure, or exit.
async fn wait_for_ready(
    child: &mut Child,
    stdout: &mut Lines<BufReader<ChildStdout>>,
    stderr: &mut Lines<BufReader<ChildStderr>>,
) -> IpcResult<()> {
    let mut stderr_open = true;
    loop {
        tokio::select! {
            line = stdout.next_line() => match line {
                Ok(Some(line)) => {
                    log::trace!("[Transport] stdout: {}", line);
                    if line.contains(IPC_READY_MARKER) {
                        return Ok(());
                    }
                }
                Ok(None) | Err(_) => {
                    let status = child
                        .wait()
                        .await
                        .map_err(|e| IpcError::Spawn(e.to_string()))?;
                    return Err(IpcError::ProcessExited(status.code()));
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    if line.contains(IPC_BIND_FAILURE_MARKER) {
                        return Err(IpcError::BindFailed(line));
                    }
                    if line.contains(IPC_READY_MARKER) {
                        return Ok(());
                    }
                    log::debug!("[Transport] stderr: {}", line);
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    }
}

/// Keeps reading process output so the child never blocks on a full pipe.
async fn drain_output<R>(mut lines: Lines<BufReader<R>>, label: String, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        log::trace!("[Transport:{}] {}: {}", label, stream, line);
    }
}

/// Reads one socket until it closes or the session is torn down.
async fn read_loop(
    mut reader: IpcReader,
    channel: Arc<IpcChannel>,
    shared: Arc<Shared>,
    dispatch_events: bool,
    cancel: CancellationToken,
) {
    let mut decoder = MessageDecoder::new();
    let mut buf = vec![0u8; 8192];

    let close_error = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break IpcError::ConnectionClosed,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break IpcError::ConnectionClosed,
            Ok(n) => {
                for message in decoder.push(&buf[..n]) {
                    match message {
                        IncomingMessage::Response {
                            request_id,
                            error,
                            data,
                        } => {
                            let result = if error == RESPONSE_SUCCESS {
                                Ok(data)
                            } else {
                                Err(IpcError::Command {
                                    command: String::new(),
                                    error,
                                })
                            };
                            if !channel.pending.resolve(request_id, result) {
                                log::trace!(
                                    "[Transport:{}] Response for unknown request #{} on {}",
                                    shared.label,
                                    request_id,
                                    channel.name
                                );
                            }
                        }
                        IncomingMessage::Event(event) if dispatch_events => {
                            if event == TransportEvent::Shutdown {
                                shared.shutdown_seen.store(true, Ordering::SeqCst);
                            }
                            shared.emit(event);
                        }
                        // Every client receives player events; only the
                        // observe channel forwards them.
                        IncomingMessage::Event(_) => {}
                    }
                }
            }
            Err(e) => break IpcError::Io(e.to_string()),
        }
    };

    let failed = channel.close(&close_error);
    if failed > 0 {
        log::debug!(
            "[Transport:{}] Failed {} pending request(s) on {}: {}",
            shared.label,
            failed,
            channel.name,
            close_error
        );
    }

    if dispatch_events && !cancel.is_cancelled() {
        shared.on_observer_closed();
    }
}
