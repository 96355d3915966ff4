//! Player configuration and the shared player state registry.
//!
//! [`PlayerConfig`] is the configuration consumed by the player core.
//! [`PlayerState`] is the single-writer registry of the current
//! [`PlayerStatus`]: the orchestrator owns the writer, collaborators (UI
//! emission, quiz timers) hold a [`PlayerStateReader`].

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol_constants::{
    PROP_FULLSCREEN, PROP_MUTE, PROP_PAUSE, PROP_TIME_POS, PROP_VOLUME, STARTUP_ATTEMPTS,
    STARTUP_TIMEOUT,
};
use crate::state_adapter::normalize_position;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Horizontal anchor of the picture-in-picture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAnchor {
    Left,
    Center,
    #[default]
    Right,
}

/// Vertical anchor of the picture-in-picture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAnchor {
    Top,
    Center,
    #[default]
    Bottom,
}

/// Picture-in-picture window placement, used when not fullscreen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipConfig {
    /// Window width as a percentage of the screen width.
    pub size: u8,
    pub position_x: HorizontalAnchor,
    pub position_y: VerticalAnchor,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            size: 55,
            position_x: HorizontalAnchor::Right,
            position_y: VerticalAnchor::Bottom,
        }
    }
}

/// Configuration for the player core.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    // Process
    /// Player binary (resolved through `PATH` when relative).
    pub binary: PathBuf,
    /// Hardware decoding mode passed as `--hwdec`.
    pub hwdec: String,
    /// Video output driver override.
    pub video_output: Option<String>,
    /// Extra raw arguments, split on whitespace and appended verbatim.
    pub extra_command_line: String,
    /// Window title.
    pub window_title: String,

    // Audio
    pub volume: u8,
    /// Audio delay in milliseconds.
    pub audio_delay_ms: i64,
    pub audio_device: Option<String>,

    // Directories
    pub fonts_dir: Option<PathBuf>,
    pub screenshots_dir: Option<PathBuf>,
    pub logs_dir: PathBuf,
    /// Directory for IPC sockets.
    pub temp_dir: PathBuf,

    // Window
    pub fullscreen: bool,
    pub borders: bool,
    pub stay_on_top: bool,
    /// Screen index for window placement and fullscreen.
    pub screen: Option<u32>,
    pub pip: PipConfig,

    // Features
    /// Launch a second, muted "monitor" player mirroring the main one.
    pub monitor_enabled: bool,
    /// Close the audience poll shortly before the end of each song.
    pub poll_enabled: bool,
    pub show_avatar: bool,
    pub show_qr_code: bool,
    pub qr_code_image: Option<String>,
    /// Fraction of the avatar width kept inside the circular crop.
    pub avatar_crop_ratio: f64,
    /// Text shown in the mid-song banner.
    pub banner_text: String,
    /// Background image for stop/pause/poll screens.
    pub background_image: Option<String>,

    // Startup and IPC
    pub startup_timeout_ms: u64,
    pub startup_attempts: u32,
    /// Bound on every command round-trip. Unset waits forever.
    pub command_timeout_ms: Option<u64>,
}

impl PlayerConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.volume > 100 {
            return Err("volume must be between 0 and 100".to_string());
        }
        if self.pip.size == 0 || self.pip.size > 100 {
            return Err("pip.size must be between 1 and 100".to_string());
        }
        if self.startup_attempts == 0 {
            return Err("startup_attempts must be >= 1".to_string());
        }
        if self.startup_timeout_ms == 0 {
            return Err("startup_timeout_ms must be >= 1".to_string());
        }
        if !(self.avatar_crop_ratio > 0.0 && self.avatar_crop_ratio <= 1.0) {
            return Err("avatar_crop_ratio must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let temp_dir = std::env::temp_dir();
        Self {
            binary: PathBuf::from("mpv"),
            hwdec: "auto-safe".to_string(),
            video_output: None,
            extra_command_line: String::new(),
            window_title: "${title} - Karaoke Mugen Player".to_string(),
            volume: 100,
            audio_delay_ms: 0,
            audio_device: None,
            fonts_dir: None,
            screenshots_dir: None,
            logs_dir: temp_dir.clone(),
            temp_dir,
            fullscreen: false,
            borders: true,
            stay_on_top: false,
            screen: None,
            pip: PipConfig::default(),
            monitor_enabled: false,
            poll_enabled: false,
            show_avatar: true,
            show_qr_code: false,
            qr_code_image: None,
            avatar_crop_ratio: 1.0,
            banner_text: String::new(),
            background_image: None,
            startup_timeout_ms: STARTUP_TIMEOUT.as_millis() as u64,
            startup_attempts: STARTUP_ATTEMPTS,
            command_timeout_ms: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Player Status
// ─────────────────────────────────────────────────────────────────────────────

/// Which of the two player instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerKind {
    Main,
    /// Muted mirror on the operator's screen.
    Monitor,
}

impl PlayerKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Monitor => "monitor",
        }
    }
}

impl std::fmt::Display for PlayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Playback state of the current media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// What kind of media is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MediaType {
    Song,
    Pause,
    Poll,
    #[default]
    Stop,
    Jingle,
    Sponsor,
    Intro,
    Outro,
    Encore,
}

impl MediaType {
    /// Background screens whose end-of-file never means a song finished.
    #[must_use]
    pub fn is_background(self) -> bool {
        matches!(self, Self::Stop | Self::Pause | Self::Poll)
    }
}

/// Informational OSD currently displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum InfoDisplay {
    #[default]
    None,
    SongInfo,
    Banner,
}

/// One-shot flags for the current song, reset on every load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SongFlags {
    pub next_song_notified: bool,
    pub poll_ended: bool,
}

/// Media handed to `play()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SongDescriptor {
    pub id: Option<String>,
    pub title: String,
    pub series: Option<String>,
    pub artists: Vec<String>,
    /// Song type and version (e.g. "OP1", "Full").
    pub version: Option<String>,
    pub requester: Option<String>,
    /// Duration in seconds.
    pub duration: f64,
    pub media_path: String,
    pub subfile: Option<String>,
    /// Loudness string, `I,TP,LRA,thresh,offset`.
    pub loudnorm: Option<String>,
    /// Requester avatar image.
    pub avatar: Option<String>,
    pub subtitle_track: Option<i64>,
    pub audio_track: Option<i64>,
    /// Start offset in seconds.
    pub start: Option<f64>,
    /// The media has no video stream (audio-only songs).
    pub audio_only: bool,
    pub warnings: Vec<String>,
}

impl SongDescriptor {
    /// First line of the song info display.
    #[must_use]
    pub fn heading(&self) -> String {
        match (&self.series, self.artists.is_empty()) {
            (Some(series), _) => series.clone(),
            (None, false) => self.artists.join(", "),
            (None, true) => String::new(),
        }
    }
}

/// Snapshot of everything known about the player.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub playback: PlaybackState,
    pub media_type: MediaType,
    pub current_song: Option<SongDescriptor>,
    /// Seconds, never negative.
    pub position: f64,
    pub volume: f64,
    pub mute: bool,
    pub fullscreen: bool,
    pub on_top: bool,
    pub show_subs: bool,
    pub audio_track: Option<i64>,
    pub subtitle_track: Option<i64>,
    pub audio_device: Option<String>,
    pub game_mode: bool,
    pub info_display: InfoDisplay,
    pub ffmpeg_version: Option<String>,
    pub mpv_version: Option<String>,
    #[serde(skip)]
    pub flags: SongFlags,
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self {
            playback: PlaybackState::Stopped,
            media_type: MediaType::Stop,
            current_song: None,
            position: 0.0,
            volume: 100.0,
            mute: false,
            fullscreen: false,
            on_top: false,
            show_subs: true,
            audio_track: None,
            subtitle_track: None,
            audio_device: None,
            game_mode: false,
            info_display: InfoDisplay::None,
            ffmpeg_version: None,
            mpv_version: None,
            flags: SongFlags::default(),
        }
    }
}

impl PlayerStatus {
    /// Duration of the current song, zero when none is loaded.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.current_song.as_ref().map_or(0.0, |s| s.duration)
    }

    /// Applies one property change. Returns whether anything changed.
    pub fn apply_property(&mut self, name: &str, data: &Value) -> bool {
        match name {
            PROP_TIME_POS => replace(&mut self.position, normalize_position(data)),
            PROP_PAUSE => {
                let Some(paused) = data.as_bool() else {
                    return false;
                };
                if self.playback == PlaybackState::Stopped && !paused {
                    return false;
                }
                let playback = if paused {
                    PlaybackState::Paused
                } else {
                    PlaybackState::Playing
                };
                replace(&mut self.playback, playback)
            }
            PROP_MUTE => data.as_bool().is_some_and(|m| replace(&mut self.mute, m)),
            PROP_VOLUME => data.as_f64().is_some_and(|v| replace(&mut self.volume, v)),
            PROP_FULLSCREEN => data
                .as_bool()
                .is_some_and(|f| replace(&mut self.fullscreen, f)),
            _ => false,
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Writer handle of the player state registry.
///
/// Held by the orchestrator only; other components read through
/// [`PlayerStateReader`].
#[derive(Debug, Default)]
pub struct PlayerState {
    inner: Arc<RwLock<PlayerStatus>>,
}

impl PlayerState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle sharing this registry.
    #[must_use]
    pub fn reader(&self) -> PlayerStateReader {
        PlayerStateReader {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PlayerStatus {
        self.inner.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&PlayerStatus) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut PlayerStatus) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Records a newly loaded media and resets the per-song flags.
    pub fn begin_media(&self, song: Option<SongDescriptor>, media_type: MediaType) {
        let mut status = self.inner.write();
        status.subtitle_track = song.as_ref().and_then(|s| s.subtitle_track);
        status.audio_track = song.as_ref().and_then(|s| s.audio_track);
        status.current_song = song;
        status.media_type = media_type;
        status.position = 0.0;
        status.flags = SongFlags::default();
        status.info_display = InfoDisplay::None;
    }
}

/// Read-only handle of the player state registry.
#[derive(Debug, Clone)]
pub struct PlayerStateReader {
    inner: Arc<RwLock<PlayerStatus>>,
}

impl PlayerStateReader {
    #[must_use]
    pub fn snapshot(&self) -> PlayerStatus {
        self.inner.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&PlayerStatus) -> R) -> R {
        f(&self.inner.read())
    }
}
