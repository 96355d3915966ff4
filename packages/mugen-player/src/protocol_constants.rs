//! Fixed constants that should NOT be changed.
//!
//! These values are defined by the player's IPC protocol or by the timing
//! contract the rest of the application relies on.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Player IPC
// ─────────────────────────────────────────────────────────────────────────────

/// Line printed by the player (at `ipc=v` verbosity) once its IPC server listens.
///
/// Unix prints "socket", Windows prints "pipe"; both share this prefix.
pub const IPC_READY_MARKER: &str = "Listening to IPC";

/// Fragment printed on stderr when the IPC server cannot be bound.
pub const IPC_BIND_FAILURE_MARKER: &str = "Could not bind IPC";

/// Hard limit for the player to signal IPC readiness.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for the process to exit after a `quit` command.
pub const QUIT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Status value the player uses for successful command responses.
pub const RESPONSE_SUCCESS: &str = "success";

/// Capacity of the transport's event broadcast channel.
pub const TRANSPORT_EVENT_CAPACITY: usize = 256;

/// Capacity of each observed property broadcast channel.
pub const PROPERTY_CHANNEL_CAPACITY: usize = 64;

/// Baseline flags passed to every player process.
///
/// `--idle` keeps the process alive without media; the message level keeps
/// the IPC readiness line while silencing everything else on stdout.
pub const BASELINE_FLAGS: &[&str] = &["--idle=yes", "--msg-level=all=no,ipc=v"];

// ─────────────────────────────────────────────────────────────────────────────
// Player properties
// ─────────────────────────────────────────────────────────────────────────────

pub const PROP_TIME_POS: &str = "time-pos";
pub const PROP_PAUSE: &str = "pause";
pub const PROP_EOF_REACHED: &str = "eof-reached";
pub const PROP_MUTE: &str = "mute";
pub const PROP_VOLUME: &str = "volume";
pub const PROP_FULLSCREEN: &str = "fullscreen";
pub const PROP_FFMPEG_VERSION: &str = "ffmpeg-version";
pub const PROP_MPV_VERSION: &str = "mpv-version";

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator timing
// ─────────────────────────────────────────────────────────────────────────────

/// Number of start attempts before a startup failure becomes fatal.
pub const STARTUP_ATTEMPTS: u32 = 3;

/// Minimum spacing between position-driven side effects (8 updates/second).
pub const POSITION_THROTTLE: Duration = Duration::from_millis(125);

/// Seconds before the end of a song when the "next song" notification fires.
pub const NEXT_SONG_NOTICE_SECS: f64 = 15.0;

/// Seconds before the end of a song when an open poll is closed.
pub const POLL_END_SECS: f64 = 10.0;

/// Length of the song info window at the start and end of a song.
pub const SONG_INFO_WINDOW_SECS: f64 = 8.0;

/// Half-width of the banner window around the middle of a song.
pub const MID_SONG_WINDOW_SECS: f64 = 4.0;

/// Fallback screen resolution when detection fails or reports zero.
pub const DEFAULT_RESOLUTION: (u32, u32) = (1920, 1080);

/// OSD overlay id used for song info and banner displays.
pub const INFO_OVERLAY_ID: u64 = 1;

/// OSD overlay id used for free-form operator messages.
pub const MESSAGE_OVERLAY_ID: u64 = 2;
