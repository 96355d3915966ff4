//! Player process launch configuration.
//!
//! Turns a [`PlayerConfig`] into the argument list and transport options for
//! one player instance. The monitor instance gets its own log file, no audio,
//! and a window placed so it does not cover the main one.

use std::fmt;
use std::time::Duration;

use crate::context::DisplayDetector;
use crate::ipc::{ipc_socket_path, TransportOptions};
use crate::protocol_constants::DEFAULT_RESOLUTION;
use crate::state::{HorizontalAnchor, PlayerConfig, PlayerKind, VerticalAnchor};
use crate::utils::now_millis;

/// Window size and placement, rendered as mpv's `WxH+X%+Y%`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub x_percent: u32,
    pub y_percent: u32,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}%+{}%",
            self.width, self.height, self.x_percent, self.y_percent
        )
    }
}

fn anchor_x(anchor: HorizontalAnchor) -> u32 {
    match anchor {
        HorizontalAnchor::Left => 1,
        HorizontalAnchor::Center => 50,
        HorizontalAnchor::Right => 99,
    }
}

fn anchor_y(anchor: VerticalAnchor) -> u32 {
    match anchor {
        VerticalAnchor::Top => 5,
        VerticalAnchor::Center => 50,
        VerticalAnchor::Bottom => 99,
    }
}

/// Computes the picture-in-picture window geometry.
///
/// Falls back to 1920x1080 when the resolution is unknown or zero. The target
/// height is always 16:9 of the computed width.
#[must_use]
pub fn compute_geometry(
    config: &PlayerConfig,
    kind: PlayerKind,
    resolution: Option<(u32, u32)>,
) -> Geometry {
    let (screen_width, _) = resolution
        .filter(|&(w, h)| w > 0 && h > 0)
        .unwrap_or(DEFAULT_RESOLUTION);

    let width = screen_width * u32::from(config.pip.size) / 100;
    let height = width * 9 / 16;

    let mut x = anchor_x(config.pip.position_x);
    let mut y = anchor_y(config.pip.position_y);

    if kind == PlayerKind::Monitor {
        if x != 50 {
            x = 100 - x;
        } else if y != 50 {
            y = 100 - y;
        } else {
            x = 1;
        }
    }

    Geometry {
        width,
        height,
        x_percent: x,
        y_percent: y,
    }
}

/// Builds the player argument list for one instance.
#[must_use]
pub fn build_args(
    config: &PlayerConfig,
    kind: PlayerKind,
    resolution: Option<(u32, u32)>,
    timestamp_ms: u64,
) -> Vec<String> {
    let monitor = kind == PlayerKind::Monitor;
    let log_name = if monitor {
        format!("mpv.{}.monitor.log", timestamp_ms)
    } else {
        format!("mpv.{}.log", timestamp_ms)
    };

    let mut args = vec![
        format!("--log-file={}", config.logs_dir.join(log_name).display()),
        format!("--hwdec={}", config.hwdec),
        format!("--volume={}", config.volume),
        format!("--audio-delay={}", config.audio_delay_ms as f64 / 1000.0),
        "--osd-level=0".to_string(),
        "--sub-visibility=yes".to_string(),
        "--sub-ass-vsfilter-aspect-compat=no".to_string(),
        "--sub-ass-vsfilter-blur-compat=no".to_string(),
        "--loop-file=no".to_string(),
        "--reset-on-next-file=pause,loop-file,audio-files,aid,sid".to_string(),
        "--keep-open=yes".to_string(),
        format!("--title={}", config.window_title),
        "--osc=no".to_string(),
        "--screenshot-format=png".to_string(),
    ];

    if let Some(fonts) = &config.fonts_dir {
        args.push(format!("--sub-fonts-dir={}", fonts.display()));
    }
    if let Some(dir) = &config.screenshots_dir {
        args.push(format!("--screenshot-directory={}", dir.display()));
    }

    if monitor {
        args.push("--mute=yes".to_string());
        args.push("--ao=null".to_string());
    } else if let Some(device) = &config.audio_device {
        args.push(format!("--audio-device={}", device));
    }

    if !config.borders {
        args.push("--no-border".to_string());
    }
    if config.stay_on_top {
        args.push("--ontop".to_string());
    }
    if let Some(screen) = config.screen {
        args.push(format!("--screen={}", screen));
        args.push(format!("--fs-screen={}", screen));
    }

    // The monitor always runs windowed
    if config.fullscreen && !monitor {
        args.push("--fullscreen".to_string());
    } else {
        args.push(format!(
            "--geometry={}",
            compute_geometry(config, kind, resolution)
        ));
    }

    if let Some(vo) = &config.video_output {
        args.push(format!("--vo={}", vo));
    }

    args.extend(
        config
            .extra_command_line
            .split_whitespace()
            .map(str::to_string),
    );

    args
}

/// Resolves everything the transport needs to launch one instance.
#[must_use]
pub fn transport_options(
    config: &PlayerConfig,
    kind: PlayerKind,
    display: &dyn DisplayDetector,
) -> TransportOptions {
    let resolution = display.resolution(config.screen);
    if resolution.is_none() {
        log::debug!(
            "[Player:{}] Screen resolution unknown, using {}x{}",
            kind,
            DEFAULT_RESOLUTION.0,
            DEFAULT_RESOLUTION.1
        );
    }

    let socket_path = ipc_socket_path(kind.label(), &config.temp_dir);
    let mut options = TransportOptions::new(kind.label(), config.binary.clone(), socket_path);
    options.args = build_args(config, kind, resolution, now_millis());
    options.startup_timeout = Duration::from_millis(config.startup_timeout_ms);
    options.command_timeout = config.command_timeout_ms.map(Duration::from_millis);
    options
}
