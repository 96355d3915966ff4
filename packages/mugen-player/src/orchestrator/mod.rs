//! Player orchestrator.
//!
//! A [`Player`] drives one player process through its lifecycle:
//!
//! ```text
//! Uninitialized → Configuring → Starting → Running → Stopping → Destroyed
//!                                  ↑          │
//!                                  └─ Crashed ┘  (auto-recreate)
//! ```
//!
//! It binds transport events to the state registry, runs the throttled
//! position timeline, interprets remote-control messages, and recovers from
//! crashes by recreating the process. Main and monitor instances are paired
//! through [`Players`].

mod playback;
mod players;
mod remote;
mod timeline;

pub use playback::OsdAlignment;
pub use players::Players;
pub use remote::RemoteCommand;
pub use timeline::{display_for, TimelineAction};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::context::{DisplayDetector, PlaylistControl};
use crate::error::{ErrorCode, IpcError, PlayerError, PlayerResult};
use crate::events::{ConfigEvent, EventEmitter, PlayerEvent};
use crate::filter_graph::{MediaCapabilities, Platform};
use crate::ipc::{PlayerTransport, TransportEvent, TransportFactory};
use crate::launch::transport_options;
use crate::protocol_constants::{
    POSITION_THROTTLE, PROP_EOF_REACHED, PROP_FFMPEG_VERSION, PROP_FULLSCREEN, PROP_MPV_VERSION,
    PROP_MUTE, PROP_PAUSE, PROP_TIME_POS, PROP_VOLUME,
};
use crate::runtime::TaskSpawner;
use crate::state::{
    PlaybackState, PlayerConfig, PlayerKind, PlayerState, PlayerStateReader, PlayerStatus,
};
use crate::state_adapter::{throttle_latest, PlayerStateAdapter};

const FULLSCREEN_HINT: &str = "Press F or double-click to leave fullscreen";
const FULLSCREEN_HINT_DURATION: Duration = Duration::from_secs(3);

/// Lifecycle phase of one player instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    Uninitialized,
    Configuring,
    Starting,
    Running,
    Stopping,
    Destroyed,
    /// The process died; recreation is pending or in progress.
    Crashed,
    /// Every start attempt failed.
    Failed,
}

/// Collaborators shared by the player instances.
#[derive(Clone)]
pub struct PlayerDeps {
    pub config: Arc<RwLock<PlayerConfig>>,
    pub emitter: Arc<dyn EventEmitter>,
    pub playlist: Arc<dyn PlaylistControl>,
    pub display: Arc<dyn DisplayDetector>,
    pub transports: Arc<dyn TransportFactory>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub platform: Platform,
}

/// Transport plus everything bound to it; replaced wholesale on recreate.
struct Connection {
    transport: Arc<dyn PlayerTransport>,
    adapter: PlayerStateAdapter,
    tasks: CancellationToken,
}

pub(crate) struct PlayerInner {
    kind: PlayerKind,
    deps: PlayerDeps,
    state: PlayerState,
    phase: RwLock<PlayerPhase>,
    connection: RwLock<Option<Arc<Connection>>>,
    /// Serializes configure/start/destroy/recreate.
    lifecycle: tokio::sync::Mutex<()>,
    capabilities: RwLock<MediaCapabilities>,
    /// A load is in flight; end-of-file is not a song end.
    operating: AtomicBool,
    /// Swallow the next `pause=true` (the player pauses itself at end of file).
    suppress_pause: AtomicBool,
    shutting_down: AtomicBool,
    peer: RwLock<Weak<PlayerInner>>,
    subtitle_follow_up: Mutex<Option<CancellationToken>>,
    message_timer: Mutex<Option<CancellationToken>>,
    spawner: Arc<dyn TaskSpawner>,
}

/// Handle to one player instance.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    /// Creates an unconfigured player.
    #[must_use]
    pub fn new(kind: PlayerKind, deps: PlayerDeps) -> Self {
        let spawner = Arc::clone(&deps.spawner);
        Self {
            inner: Arc::new(PlayerInner {
                kind,
                deps,
                state: PlayerState::new(),
                phase: RwLock::new(PlayerPhase::Uninitialized),
                connection: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                capabilities: RwLock::new(MediaCapabilities::conservative()),
                operating: AtomicBool::new(false),
                suppress_pause: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                peer: RwLock::new(Weak::new()),
                subtitle_follow_up: Mutex::new(None),
                message_timer: Mutex::new(None),
                spawner,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> PlayerKind {
        self.inner.kind
    }

    #[must_use]
    pub fn phase(&self) -> PlayerPhase {
        *self.inner.phase.read()
    }

    #[must_use]
    pub fn status(&self) -> PlayerStatus {
        self.inner.state.snapshot()
    }

    /// Read-only handle on this player's state registry.
    #[must_use]
    pub fn state_reader(&self) -> PlayerStateReader {
        self.inner.state.reader()
    }

    #[must_use]
    pub fn capabilities(&self) -> MediaCapabilities {
        *self.inner.capabilities.read()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .current_connection()
            .is_some_and(|c| c.transport.is_running())
    }

    /// Links two instances so a crash of one pauses the other.
    pub fn link_peer(&self, other: &Player) {
        *self.inner.peer.write() = Arc::downgrade(&other.inner);
        *other.inner.peer.write() = Arc::downgrade(&self.inner);
    }

    /// Builds the launch configuration and a fresh transport without starting it.
    pub async fn init(&self) -> PlayerResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.configure_locked()
    }

    /// Starts the player process, retrying a bounded number of times.
    ///
    /// An already running process counts as success.
    ///
    /// # Errors
    ///
    /// Returns `StartupFailed` once every attempt failed; the failure is also
    /// reported as [`PlayerEvent::StartupFailed`].
    pub async fn start(&self) -> PlayerResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        Arc::clone(&self.inner).start_locked().await
    }

    /// Stops the process and releases its transport. Can be followed by
    /// `start()` (which reconfigures) or `recreate()`.
    pub async fn destroy(&self) -> PlayerResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.destroy_locked().await
    }

    /// Destroys the current process (tolerating failure), applies `config` if
    /// given, rebuilds the transport and optionally starts it.
    pub async fn recreate(&self, config: Option<PlayerConfig>, restart: bool) -> PlayerResult<()> {
        Arc::clone(&self.inner).recreate(config, restart).await
    }

    /// Final stop: no automatic recreation afterwards.
    pub async fn shutdown(&self) -> PlayerResult<()> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let _guard = self.inner.lifecycle.lock().await;
        match self.inner.destroy_locked().await {
            Err(PlayerError::NotInitialized) => Ok(()),
            other => other,
        }
    }
}

impl PlayerInner {
    fn label(&self) -> &'static str {
        self.kind.label()
    }

    fn is_main(&self) -> bool {
        self.kind == PlayerKind::Main
    }

    fn set_phase(&self, phase: PlayerPhase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            log::debug!("[Player:{}] {:?} -> {:?}", self.label(), previous, phase);
        }
    }

    fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection.read().clone()
    }

    fn connection(&self) -> PlayerResult<Arc<Connection>> {
        match self.current_connection() {
            Some(conn) => Ok(conn),
            None if *self.phase.read() == PlayerPhase::Destroyed => Err(PlayerError::Destroyed),
            None => Err(PlayerError::NotInitialized),
        }
    }

    /// Sends one command to the current process.
    async fn command(&self, command: Value) -> PlayerResult<Value> {
        let conn = self.connection()?;
        Ok(conn.transport.send(command).await?)
    }

    async fn set_property(&self, name: &str, value: Value) -> PlayerResult<()> {
        self.command(json!(["set_property", name, value])).await?;
        Ok(())
    }

    fn emit_state(&self) {
        if self.is_main() {
            self.deps.emitter.emit_player(PlayerEvent::StateChanged {
                status: Box::new(self.state.snapshot()),
            });
        }
    }

    fn peer(&self) -> Option<Player> {
        self.peer.read().upgrade().map(|inner| Player { inner })
    }

    fn handle(self: &Arc<Self>) -> Player {
        Player {
            inner: Arc::clone(self),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn configure_locked(&self) -> PlayerResult<()> {
        self.set_phase(PlayerPhase::Configuring);

        let options = {
            let config = self.deps.config.read();
            config.validate().map_err(PlayerError::Configuration)?;
            transport_options(&config, self.kind, self.deps.display.as_ref())
        };
        log::info!(
            "[Player:{}] Configured with IPC address {}",
            self.label(),
            options.socket_path
        );

        let transport = self
            .deps
            .transports
            .create(options, Arc::clone(&self.spawner));
        let adapter = PlayerStateAdapter::new(Arc::clone(&transport), self.spawner.as_ref());
        *self.connection.write() = Some(Arc::new(Connection {
            transport,
            adapter,
            tasks: CancellationToken::new(),
        }));
        Ok(())
    }

    async fn start_locked(self: Arc<Self>) -> PlayerResult<()> {
        if self.current_connection().is_none() {
            self.configure_locked()?;
        }
        let conn = self.connection()?;
        self.set_phase(PlayerPhase::Starting);

        let attempts = self.deps.config.read().startup_attempts.max(1);
        let mut last_error: Option<IpcError> = None;
        for attempt in 1..=attempts {
            match conn.transport.start().await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) if e.is_already_running() => {
                    log::debug!("[Player:{}] Process already running", self.label());
                    last_error = None;
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "[Player:{}] Start attempt {}/{} failed: {}",
                        self.label(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(last) = last_error {
            self.set_phase(PlayerPhase::Failed);
            log::error!(
                "[Player:{}] Giving up after {} attempt(s): {}",
                self.label(),
                attempts,
                last
            );
            self.deps.emitter.emit_player(PlayerEvent::StartupFailed {
                instance: self.kind,
                error: last.to_string(),
                code: last.code(),
            });
            return Err(PlayerError::StartupFailed { attempts, last });
        }

        Arc::clone(&self).bind(&conn).await?;
        self.set_phase(PlayerPhase::Running);
        self.refresh_versions(&conn).await;

        {
            let config = self.deps.config.read();
            let volume = f64::from(config.volume);
            let fullscreen = config.fullscreen && self.is_main();
            let on_top = config.stay_on_top;
            let audio_device = config.audio_device.clone();
            self.state.update(|s| {
                s.volume = volume;
                s.fullscreen = fullscreen;
                s.on_top = on_top;
                s.audio_device = audio_device;
            });
        }
        log::info!("[Player:{}] Started", self.label());
        self.emit_state();
        Ok(())
    }

    /// Observes properties and spawns the event and position tasks.
    async fn bind(self: Arc<Self>, conn: &Arc<Connection>) -> PlayerResult<()> {
        let events = conn.transport.subscribe();

        // End of file is observed ahead of pause so its change is delivered first
        let observed: &[&str] = if self.is_main() {
            &[PROP_EOF_REACHED, PROP_PAUSE, PROP_MUTE, PROP_VOLUME, PROP_FULLSCREEN]
        } else {
            &[PROP_PAUSE]
        };
        for name in observed {
            conn.transport.observe_property(name).await?;
        }
        let positions = if self.is_main() {
            Some(conn.adapter.position().await?)
        } else {
            None
        };

        let weak = Arc::downgrade(&self);
        self.spawner.spawn(run_events(
            weak.clone(),
            events,
            conn.tasks.clone(),
        ));

        if let Some(positions) = positions {
            let throttled = throttle_latest(positions, POSITION_THROTTLE);
            self.spawner
                .spawn(run_positions(weak, throttled, conn.tasks.clone()));
        }
        Ok(())
    }

    /// Reads library versions and renegotiates filter capabilities.
    async fn refresh_versions(&self, conn: &Connection) {
        let ffmpeg = match conn.transport.send(json!(["get_property", PROP_FFMPEG_VERSION])).await {
            Ok(Value::String(version)) => Some(version),
            Ok(other) => {
                log::debug!("[Player:{}] Unexpected ffmpeg-version: {}", self.label(), other);
                None
            }
            Err(e) => {
                log::debug!("[Player:{}] Could not read ffmpeg-version: {}", self.label(), e);
                None
            }
        };
        let mpv = conn
            .transport
            .send(json!(["get_property", PROP_MPV_VERSION]))
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string));

        let capabilities = ffmpeg.as_deref().map_or_else(MediaCapabilities::conservative, |v| {
            MediaCapabilities::negotiate(self.deps.platform, v)
        });
        *self.capabilities.write() = capabilities;

        log::info!(
            "[Player:{}] {} / FFmpeg {} ({:?})",
            self.label(),
            mpv.as_deref().unwrap_or("mpv version unknown"),
            ffmpeg.as_deref().unwrap_or("unknown"),
            capabilities
        );
        self.state.update(|s| {
            s.ffmpeg_version = ffmpeg;
            s.mpv_version = mpv;
        });
    }

    async fn destroy_locked(&self) -> PlayerResult<()> {
        let conn = self.connection.write().take().ok_or(PlayerError::NotInitialized)?;
        self.set_phase(PlayerPhase::Stopping);

        conn.tasks.cancel();
        if let Some(token) = self.subtitle_follow_up.lock().take() {
            token.cancel();
        }
        if let Some(token) = self.message_timer.lock().take() {
            token.cancel();
        }
        conn.adapter.dispose().await;

        let result = if conn.transport.is_running() {
            conn.transport.stop().await.map_err(PlayerError::from)
        } else {
            Ok(())
        };

        self.state.update(|s| s.playback = PlaybackState::Stopped);
        self.set_phase(PlayerPhase::Destroyed);
        log::info!("[Player:{}] Destroyed", self.label());
        result
    }

    async fn recreate(self: Arc<Self>, config: Option<PlayerConfig>, restart: bool) -> PlayerResult<()> {
        let _guard = self.lifecycle.lock().await;

        if self.current_connection().is_some() {
            if let Err(e) = self.destroy_locked().await {
                log::warn!(
                    "[Player:{}] Destroy before recreate failed, assuming it is gone: {}",
                    self.label(),
                    e
                );
            }
        }

        if let Some(config) = config {
            *self.deps.config.write() = config;
        }

        self.configure_locked()?;
        if restart {
            Arc::clone(&self).start_locked().await?;
        }

        log::info!("[Player:{}] Recreated", self.label());
        self.deps
            .emitter
            .emit_player(PlayerEvent::Recreated { instance: self.kind });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event handling
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::PropertyChange { name, data } => self.on_property(&name, &data).await,
            TransportEvent::ClientMessage { args } => match RemoteCommand::parse(&args) {
                Some(command) => {
                    let this = Arc::clone(self);
                    self.spawner.spawn(async move { this.dispatch_remote(command).await });
                }
                None => log::debug!("[Player:{}] Ignoring client message {:?}", self.label(), args),
            },
            TransportEvent::Crashed | TransportEvent::Shutdown => self.on_unexpected_close(),
            other => log::trace!("[Player:{}] Event {}", self.label(), other.kind()),
        }
    }

    async fn on_property(self: &Arc<Self>, name: &str, data: &Value) {
        match name {
            // Handled by the throttled position task
            PROP_TIME_POS => {}
            PROP_EOF_REACHED => {
                if data.as_bool() == Some(true) {
                    self.on_end_of_file();
                } else {
                    self.suppress_pause.store(false, Ordering::SeqCst);
                }
            }
            PROP_PAUSE => {
                if data.as_bool() == Some(true) && self.suppress_pause.swap(false, Ordering::SeqCst) {
                    log::debug!("[Player:{}] Ignoring end-of-file pause", self.label());
                    return;
                }
                if self.state.update(|s| s.apply_property(name, data)) {
                    self.emit_state();
                }
            }
            PROP_FULLSCREEN => {
                if !self.state.update(|s| s.apply_property(name, data)) {
                    return;
                }
                let fullscreen = self.state.read(|s| s.fullscreen);
                self.deps.config.write().fullscreen = fullscreen;
                self.deps
                    .emitter
                    .emit_config(ConfigEvent::FullscreenChanged { fullscreen });
                self.emit_state();

                let player = self.handle();
                let hint = if fullscreen {
                    player
                        .display_message(FULLSCREEN_HINT, Some(FULLSCREEN_HINT_DURATION), OsdAlignment::Top)
                        .await
                } else {
                    player.clear_message().await
                };
                if let Err(e) = hint {
                    log::debug!("[Player:{}] Fullscreen hint failed: {}", self.label(), e);
                }
            }
            _ => {
                if self.state.update(|s| s.apply_property(name, data)) {
                    self.emit_state();
                }
            }
        }
    }

    fn on_end_of_file(self: &Arc<Self>) {
        let media_type = self.state.read(|s| s.media_type);
        if self.operating.load(Ordering::SeqCst) || media_type.is_background() {
            log::debug!(
                "[Player:{}] End of file ignored ({:?}, operating: {})",
                self.label(),
                media_type,
                self.operating.load(Ordering::SeqCst)
            );
            return;
        }

        log::info!("[Player:{}] Song ended", self.label());
        self.suppress_pause.store(true, Ordering::SeqCst);
        let playlist = Arc::clone(&self.deps.playlist);
        let label = self.label();
        self.spawner.spawn(async move {
            if let Err(e) = playlist.song_ended().await {
                log::warn!("[Player:{}] Song-ended handler failed: {}", label, e);
            }
        });
    }

    fn on_unexpected_close(self: &Arc<Self>) {
        {
            let mut phase = self.phase.write();
            if *phase != PlayerPhase::Running {
                return;
            }
            *phase = PlayerPhase::Crashed;
        }
        log::warn!("[Player:{}] Player process closed unexpectedly", self.label());

        self.state.update(|s| {
            s.playback = PlaybackState::Stopped;
            s.position = 0.0;
        });
        self.emit_state();

        if let Some(peer) = self.peer() {
            let label = self.label();
            self.spawner.spawn(async move {
                if let Err(e) = peer.pause().await {
                    log::debug!("[Player:{}] Could not pause peer after crash: {}", label, e);
                }
            });
        }

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        self.spawner.spawn(async move {
            let label = this.label();
            if let Err(e) = this.recreate(None, true).await {
                log::error!("[Player:{}] Recreate after crash failed: {}", label, e);
            }
        });
    }

    async fn dispatch_remote(self: Arc<Self>, command: RemoteCommand) {
        log::info!("[Player:{}] Remote command {:?}", self.label(), command);
        let result = match command {
            RemoteCommand::Skip => self.deps.playlist.next().await,
            RemoteCommand::GoBack => self.deps.playlist.previous().await,
            RemoteCommand::Seek(position) => {
                self.with_peer(move |p| async move { p.seek(position).await })
                    .await
            }
            RemoteCommand::TogglePause => {
                self.with_peer(|p| async move { p.toggle_pause().await })
                    .await
            }
            RemoteCommand::ToggleSubs => {
                self.with_peer(|p| async move { p.toggle_subs().await })
                    .await
            }
        };
        if let Err(e) = result {
            log::warn!(
                "[Player:{}] Remote command {:?} failed: {}",
                self.label(),
                command,
                e
            );
        }
    }

    /// Runs `action` on this instance, then on the peer (peer failures are logged).
    async fn with_peer<F, Fut>(self: &Arc<Self>, action: F) -> PlayerResult<()>
    where
        F: Fn(Player) -> Fut,
        Fut: Future<Output = PlayerResult<()>>,
    {
        let result = action(self.handle()).await;
        if let Some(peer) = self.peer() {
            if let Err(e) = action(peer).await {
                log::debug!("[Player:{}] Peer did not follow: {}", self.label(), e);
            }
        }
        result
    }

    async fn on_position(self: &Arc<Self>, position: f64) {
        let poll_enabled = self.deps.config.read().poll_enabled;
        let actions = self.state.update(|s| {
            s.position = position;
            let actions = timeline::evaluate(s, poll_enabled);
            timeline::apply(s, &actions);
            actions
        });
        self.emit_state();

        for action in actions {
            match action {
                TimelineAction::NotifyNextSong => {
                    log::debug!("[Player:{}] Next song notice", self.label());
                    self.deps.emitter.emit_player(PlayerEvent::NextSongSoon);
                }
                TimelineAction::EndPoll => {
                    log::debug!("[Player:{}] Ending poll", self.label());
                    self.deps.emitter.emit_player(PlayerEvent::PollEnded);
                }
                TimelineAction::GamePosition { position, duration } => {
                    self.deps
                        .emitter
                        .emit_player(PlayerEvent::GamePosition { position, duration });
                }
                TimelineAction::Display(display) => {
                    if let Err(e) = self.handle().show_info_display(display).await {
                        log::debug!("[Player:{}] Info display failed: {}", self.label(), e);
                    }
                }
            }
        }
    }
}

async fn run_events(
    player: Weak<PlayerInner>,
    mut events: broadcast::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                let Some(player) = player.upgrade() else { break };
                player.on_event(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("[Player] Dropped {} transport events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_positions<S>(player: Weak<PlayerInner>, positions: S, cancel: CancellationToken)
where
    S: futures::Stream<Item = f64> + Send,
{
    let mut positions = Box::pin(positions);
    loop {
        let position = tokio::select! {
            _ = cancel.cancelled() => break,
            position = positions.next() => position,
        };
        let Some(position) = position else { break };
        let Some(player) = player.upgrade() else { break };
        player.on_position(position).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::RecordingPlaylist;
    use crate::context::NoDisplayDetector;
    use crate::events::RecordingEmitter;
    use crate::ipc::mock::{MockTransport, MockTransportFactory};
    use crate::state::{InfoDisplay, MediaType, SongDescriptor};

    struct Harness {
        factory: Arc<MockTransportFactory>,
        emitter: Arc<RecordingEmitter>,
        playlist: Arc<RecordingPlaylist>,
        config: Arc<RwLock<PlayerConfig>>,
    }

    impl Harness {
        fn new(config: PlayerConfig) -> Self {
            Self::with_playlist(config, RecordingPlaylist::default())
        }

        fn with_playlist(config: PlayerConfig, playlist: RecordingPlaylist) -> Self {
            Self {
                factory: Arc::new(MockTransportFactory::new()),
                emitter: Arc::new(RecordingEmitter::default()),
                playlist: Arc::new(playlist),
                config: Arc::new(RwLock::new(config)),
            }
        }

        fn deps(&self) -> PlayerDeps {
            PlayerDeps {
                config: Arc::clone(&self.config),
                emitter: self.emitter.clone(),
                playlist: self.playlist.clone(),
                display: Arc::new(NoDisplayDetector),
                transports: self.factory.clone(),
                spawner: Arc::new(crate::runtime::TokioSpawner::current()),
                platform: Platform::Linux,
            }
        }

        fn player(&self, kind: PlayerKind) -> Player {
            Player::new(kind, self.deps())
        }

        async fn started(&self, kind: PlayerKind) -> (Player, Arc<MockTransport>) {
            let player = self.player(kind);
            player.start().await.unwrap();
            let mock = self.factory.latest();
            (player, mock)
        }

        fn count(&self, pred: impl Fn(&PlayerEvent) -> bool) -> usize {
            self.emitter.count(pred)
        }
    }

    /// Lets the event, adapter and throttle tasks run past one throttle window.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    fn song(title: &str, duration: f64) -> SongDescriptor {
        SongDescriptor {
            title: title.into(),
            duration,
            media_path: format!("/medias/{}.mp4", title),
            ..SongDescriptor::default()
        }
    }

    async fn position(mock: &MockTransport, seconds: f64) {
        mock.emit_property(PROP_TIME_POS, json!(seconds));
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn startup_gives_up_after_three_attempts() {
        let harness = Harness::new(PlayerConfig::default());
        let mock = MockTransport::new();
        mock.fail_starts((0..3).map(|_| IpcError::Spawn("mpv not found".into())));
        let mock = harness.factory.prepare(mock);

        let player = harness.player(PlayerKind::Main);
        let err = player.start().await.unwrap_err();

        assert!(matches!(err, PlayerError::StartupFailed { attempts: 3, .. }));
        assert_eq!(mock.start_calls(), 3);
        assert_eq!(player.phase(), PlayerPhase::Failed);
        assert_eq!(
            harness.count(|e| matches!(
                e,
                PlayerEvent::StartupFailed { instance: PlayerKind::Main, code: "spawn_failed", .. }
            )),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn startup_retries_after_a_failed_attempt() {
        let harness = Harness::new(PlayerConfig::default());
        let mock = MockTransport::new();
        mock.fail_starts([IpcError::StartupTimeout(Duration::from_secs(10))]);
        let mock = harness.factory.prepare(mock);

        let player = harness.player(PlayerKind::Main);
        player.start().await.unwrap();

        assert_eq!(mock.start_calls(), 2);
        assert_eq!(player.phase(), PlayerPhase::Running);
        assert!(player.is_running());
        assert_eq!(harness.count(|e| matches!(e, PlayerEvent::StartupFailed { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn already_running_process_counts_as_started() {
        let harness = Harness::new(PlayerConfig::default());
        let mock = harness.factory.prepare(MockTransport::running());

        let player = harness.player(PlayerKind::Main);
        player.start().await.unwrap();

        assert_eq!(mock.start_calls(), 1);
        assert_eq!(player.phase(), PlayerPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn main_observes_more_than_monitor() {
        let harness = Harness::new(PlayerConfig::default());

        let (_main, main_mock) = harness.started(PlayerKind::Main).await;
        let (_monitor, monitor_mock) = harness.started(PlayerKind::Monitor).await;

        assert_eq!(
            main_mock.observe_calls(),
            vec!["eof-reached", "pause", "mute", "volume", "fullscreen", "time-pos"]
        );
        assert_eq!(monitor_mock.observe_calls(), vec!["pause"]);
        assert_eq!(harness.factory.latest_options().label, "monitor");
    }

    #[tokio::test(start_paused = true)]
    async fn commands_before_start_are_rejected() {
        let harness = Harness::new(PlayerConfig::default());
        let player = harness.player(PlayerKind::Main);

        assert!(matches!(player.pause().await, Err(PlayerError::NotInitialized)));
        assert!(matches!(
            player.play(song("a", 60.0)).await,
            Err(PlayerError::NotInitialized)
        ));
        assert!(matches!(
            player.play(SongDescriptor::default()).await,
            Err(PlayerError::InvalidMedia(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_file_ends_songs_only() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;

        player.play(song("first", 90.0)).await.unwrap();
        assert_eq!(player.status().playback, PlaybackState::Playing);

        mock.emit_property(PROP_EOF_REACHED, json!(true));
        mock.emit_property(PROP_PAUSE, json!(true));
        settle().await;

        assert_eq!(harness.playlist.calls(), vec!["song_ended"]);
        // The pause mpv applies at end of file is swallowed
        assert_eq!(player.status().playback, PlaybackState::Playing);

        player.display_background(MediaType::Pause, None).await.unwrap();
        mock.emit_property(PROP_EOF_REACHED, json!(true));
        settle().await;

        assert_eq!(harness.playlist.calls(), vec!["song_ended"]);
        assert_eq!(player.status().media_type, MediaType::Pause);
        assert_eq!(mock.sent_named("stop").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_file_pause_suppression_ends_with_the_file() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;

        player.play(song("first", 90.0)).await.unwrap();
        mock.emit_property(PROP_EOF_REACHED, json!(true));
        settle().await;
        assert_eq!(harness.playlist.calls(), vec!["song_ended"]);

        // No pause came with the end of file; the stop screen takes over
        player.display_background(MediaType::Stop, None).await.unwrap();
        mock.emit_property(PROP_PAUSE, json!(true));
        settle().await;
        assert_eq!(player.status().playback, PlaybackState::Paused);

        player.play(song("second", 90.0)).await.unwrap();
        mock.emit_property(PROP_EOF_REACHED, json!(true));
        settle().await;
        mock.emit_property(PROP_EOF_REACHED, json!(false));
        mock.emit_property(PROP_PAUSE, json!(true));
        settle().await;
        assert_eq!(player.status().playback, PlaybackState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_changes_are_reported() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;
        player.play(song("a", 90.0)).await.unwrap();

        mock.emit_property(PROP_PAUSE, json!(true));
        settle().await;
        assert_eq!(player.status().playback, PlaybackState::Paused);

        player.toggle_pause().await.unwrap();
        assert_eq!(
            mock.sent().last(),
            Some(&json!(["set_property", "pause", false]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn next_song_notice_fires_once_per_song() {
        let harness = Harness::new(PlayerConfig {
            poll_enabled: true,
            ..PlayerConfig::default()
        });
        let (player, mock) = harness.started(PlayerKind::Main).await;
        let notices = || harness.count(|e| matches!(e, PlayerEvent::NextSongSoon));
        let polls = || harness.count(|e| matches!(e, PlayerEvent::PollEnded));

        player.play(song("a", 60.0)).await.unwrap();
        position(&mock, 46.0).await;
        assert_eq!((notices(), polls()), (1, 0));

        position(&mock, 51.0).await;
        assert_eq!((notices(), polls()), (1, 1));

        // Seeking back and passing the thresholds again stays silent
        position(&mock, 30.0).await;
        position(&mock, 52.0).await;
        assert_eq!((notices(), polls()), (1, 1));
        assert_eq!(player.status().position, 52.0);

        player.play(song("b", 60.0)).await.unwrap();
        position(&mock, 46.0).await;
        assert_eq!(notices(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_end_requires_poll_feature() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;

        player.play(song("a", 60.0)).await.unwrap();
        position(&mock, 55.0).await;

        assert_eq!(harness.count(|e| matches!(e, PlayerEvent::NextSongSoon)), 1);
        assert_eq!(harness.count(|e| matches!(e, PlayerEvent::PollEnded)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn info_display_follows_position() {
        let harness = Harness::new(PlayerConfig {
            banner_text: "Karaoke night".into(),
            ..PlayerConfig::default()
        });
        let (player, mock) = harness.started(PlayerKind::Main).await;
        player.play(song("a", 100.0)).await.unwrap();
        mock.clear_sent();

        position(&mock, 2.0).await;
        assert_eq!(player.status().info_display, InfoDisplay::SongInfo);
        position(&mock, 50.0).await;
        assert_eq!(player.status().info_display, InfoDisplay::Banner);
        position(&mock, 60.0).await;
        assert_eq!(player.status().info_display, InfoDisplay::None);

        let overlays = mock.sent_named("osd-overlay");
        assert_eq!(overlays.len(), 3);
        assert!(overlays[1]["data"].as_str().unwrap().contains("Karaoke night"));
        assert_eq!(overlays[2]["format"], "none");
    }

    #[tokio::test(start_paused = true)]
    async fn game_mode_reports_positions_instead_of_displays() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;
        player.play(song("a", 100.0)).await.unwrap();
        player.set_game_mode(true).await.unwrap();

        position(&mock, 3.0).await;

        assert_eq!(
            harness.count(|e| matches!(
                e,
                PlayerEvent::GamePosition { position, duration } if *position == 3.0 && *duration == 100.0
            )),
            1
        );
        assert_eq!(player.status().info_display, InfoDisplay::None);
    }

    #[tokio::test(start_paused = true)]
    async fn subtitle_track_is_selected_after_playback_starts() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;
        let sid_commands = || {
            mock.sent_named("set_property")
                .into_iter()
                .filter(|c| c[1] == "sid")
                .collect::<Vec<_>>()
        };

        let mut track = song("a", 90.0);
        track.subtitle_track = Some(3);
        player.play(track).await.unwrap();

        let load = &mock.sent_named("loadfile")[0];
        assert_eq!(load["options"]["sid"], "3");
        assert!(sid_commands().is_empty());

        // Still the previous file
        position(&mock, 42.0).await;
        assert!(sid_commands().is_empty());

        mock.emit(TransportEvent::FileLoaded);
        position(&mock, 0.0).await;
        assert!(sid_commands().is_empty());

        position(&mock, 0.5).await;
        position(&mock, 1.0).await;
        assert_eq!(sid_commands(), vec![json!(["set_property", "sid", 3])]);
    }

    #[tokio::test(start_paused = true)]
    async fn subtitle_selection_is_dropped_when_another_file_loads() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;

        let mut track = song("a", 90.0);
        track.subtitle_track = Some(2);
        player.play(track).await.unwrap();
        player.play(song("b", 90.0)).await.unwrap();

        mock.emit(TransportEvent::FileLoaded);
        position(&mock, 5.0).await;
        assert!(mock
            .sent_named("set_property")
            .iter()
            .all(|c| c[1] != "sid"));
    }

    #[tokio::test(start_paused = true)]
    async fn load_carries_filter_graph_and_overlays() {
        let harness = Harness::new(PlayerConfig::default());
        let mock = MockTransport::new();
        mock.set_property(PROP_FFMPEG_VERSION, json!("7.0.1"));
        harness.factory.prepare(mock);
        let (player, mock) = harness.started(PlayerKind::Main).await;

        assert!(player.capabilities().complex_filters);
        assert_eq!(player.status().ffmpeg_version.as_deref(), Some("7.0.1"));

        let mut track = song("a", 90.0);
        track.loudnorm = Some("-17.5,-1.2,8.1,-28.0,0.4".into());
        track.avatar = Some("/avatars/axel.png".into());
        track.subfile = Some("/lyrics/a.ass".into());
        player.play(track).await.unwrap();

        let load = &mock.sent_named("loadfile")[0];
        assert_eq!(load["url"], "/medias/a.mp4");
        assert_eq!(load["flags"], "replace");
        let options = &load["options"];
        let graph = options["lavfi-complex"].as_str().unwrap();
        assert!(graph.contains("loudnorm=measured_I=-17.5"));
        assert!(graph.contains("[vid2]"));
        assert_eq!(options["external-files"], "/avatars/axel.png");
        assert_eq!(options["sub-files"], "/lyrics/a.ass");
    }

    #[tokio::test(start_paused = true)]
    async fn old_ffmpeg_gets_passthrough_graph() {
        let harness = Harness::new(PlayerConfig::default());
        let mock = MockTransport::new();
        mock.set_property(PROP_FFMPEG_VERSION, json!("4.4.2"));
        harness.factory.prepare(mock);
        let (player, mock) = harness.started(PlayerKind::Main).await;

        let mut track = song("a", 90.0);
        track.avatar = Some("/avatars/axel.png".into());
        player.play(track).await.unwrap();

        let load = &mock.sent_named("loadfile")[0];
        assert_eq!(load["options"]["lavfi-complex"], crate::filter_graph::PASSTHROUGH);
        assert!(load["options"].get("external-files").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn crash_recreates_player_and_pauses_peer() {
        let harness = Harness::new(PlayerConfig::default());
        let (main, main_mock) = harness.started(PlayerKind::Main).await;
        let (monitor, monitor_mock) = harness.started(PlayerKind::Monitor).await;
        main.link_peer(&monitor);
        main.play(song("a", 90.0)).await.unwrap();

        main_mock.crash();
        settle().await;

        assert_eq!(harness.factory.created(), 3);
        assert_eq!(
            harness.count(|e| matches!(e, PlayerEvent::Recreated { instance: PlayerKind::Main })),
            1
        );
        assert!(monitor_mock
            .sent_named("set_property")
            .contains(&json!(["set_property", "pause", true])));
        assert_eq!(main.phase(), PlayerPhase::Running);
        assert_eq!(main.status().playback, PlaybackState::Stopped);
        assert!(harness.factory.latest().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_without_recreating() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;

        player.shutdown().await.unwrap();
        mock.emit(TransportEvent::Crashed);
        settle().await;

        assert_eq!(player.phase(), PlayerPhase::Destroyed);
        assert!(!mock.is_running());
        assert_eq!(mock.sent_named("quit").len(), 1);
        assert_eq!(harness.factory.created(), 1);
        assert!(matches!(player.pause().await, Err(PlayerError::Destroyed)));
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_applies_new_configuration() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, first) = harness.started(PlayerKind::Main).await;

        let config = PlayerConfig {
            volume: 40,
            ..PlayerConfig::default()
        };
        player.recreate(Some(config), true).await.unwrap();

        assert!(!first.is_running());
        assert_eq!(harness.factory.created(), 2);
        assert_eq!(harness.config.read().volume, 40);
        assert!(harness
            .factory
            .latest_options()
            .args
            .contains(&"--volume=40".to_string()));
        assert_eq!(player.status().volume, 40.0);
        assert_eq!(harness.count(|e| matches!(e, PlayerEvent::Recreated { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_commands_reach_playlist_and_player() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;
        player.play(song("a", 90.0)).await.unwrap();

        let message = |args: &[&str]| TransportEvent::ClientMessage {
            args: args.iter().map(|a| (*a).to_string()).collect(),
        };
        mock.emit(message(&["skip"]));
        mock.emit(message(&["go-back"]));
        mock.emit(message(&["seek", "12"]));
        mock.emit(message(&["subs"]));
        mock.emit(message(&["dance"]));
        settle().await;

        let mut calls = harness.playlist.calls();
        calls.sort_unstable();
        assert_eq!(calls, vec!["next", "previous"]);
        assert!(mock.sent().contains(&json!(["seek", 12.0, "absolute"])));
        assert!(mock
            .sent()
            .contains(&json!(["set_property", "sub-visibility", false])));
        assert!(!player.status().show_subs);
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_failures_do_not_stop_the_player() {
        let harness =
            Harness::with_playlist(PlayerConfig::default(), RecordingPlaylist::failing());
        let (player, mock) = harness.started(PlayerKind::Main).await;
        player.play(song("a", 90.0)).await.unwrap();

        mock.emit(TransportEvent::ClientMessage {
            args: vec!["skip".into()],
        });
        mock.emit_property(PROP_EOF_REACHED, json!(true));
        settle().await;

        assert_eq!(harness.playlist.calls().len(), 2);
        assert_eq!(player.phase(), PlayerPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn fullscreen_toggle_is_written_back_to_config() {
        let harness = Harness::new(PlayerConfig::default());
        let (_player, mock) = harness.started(PlayerKind::Main).await;

        mock.emit_property(PROP_FULLSCREEN, json!(true));
        settle().await;

        assert!(harness.config.read().fullscreen);
        assert!(matches!(
            harness.emitter.config.lock().as_slice(),
            [ConfigEvent::FullscreenChanged { fullscreen: true }]
        ));
        let hint = &mock.sent_named("osd-overlay")[0];
        assert!(hint["data"].as_str().unwrap().contains("leave fullscreen"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_message_clears_itself() {
        let harness = Harness::new(PlayerConfig::default());
        let (player, mock) = harness.started(PlayerKind::Main).await;

        player
            .display_message("Break time", Some(Duration::from_secs(5)), OsdAlignment::Center)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let overlays = mock.sent_named("osd-overlay");
        assert_eq!(overlays.len(), 2);
        assert_eq!(overlays[0]["data"], r"{\an5}Break time");
        assert_eq!(overlays[1]["format"], "none");
    }
}
