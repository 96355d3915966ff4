//! Host configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mugen_player::{PlayerConfig, SongDescriptor};
use serde::Deserialize;

/// Host configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Player core settings.
    pub player: PlayerConfig,

    /// Songs played before the media files given on the command line.
    pub playlist: Vec<SongDescriptor>,

    /// Start over after the last song instead of showing the stop screen.
    /// Override: `MUGEN_REPEAT`
    pub repeat: bool,

    /// Screen resolution used for window geometry, `WIDTHxHEIGHT`.
    /// Override: `MUGEN_SCREEN_RESOLUTION`
    pub screen_resolution: Option<String>,
}

impl HostConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
            .player
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid player configuration")?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MUGEN_VOLUME") {
            if let Ok(volume) = val.parse() {
                self.player.volume = volume;
            }
        }

        if let Ok(val) = std::env::var("MUGEN_HWDEC") {
            self.player.hwdec = val;
        }

        if let Ok(val) = std::env::var("MUGEN_POLL_ENABLED") {
            if let Ok(enabled) = val.parse() {
                self.player.poll_enabled = enabled;
            }
        }

        if let Ok(val) = std::env::var("MUGEN_REPEAT") {
            if let Ok(repeat) = val.parse() {
                self.repeat = repeat;
            }
        }

        if let Ok(val) = std::env::var("MUGEN_SCREEN_RESOLUTION") {
            self.screen_resolution = Some(val);
        }

        // Note: MUGEN_MPV_BINARY and MUGEN_MONITOR are handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Parses `screen_resolution`; invalid values are ignored with a warning.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        let raw = self.screen_resolution.as_deref()?;
        let parsed = raw
            .split_once(['x', 'X'])
            .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
            .filter(|&(w, h): &(u32, u32)| w > 0 && h > 0);
        if parsed.is_none() {
            log::warn!("Ignoring invalid screen resolution {:?}", raw);
        }
        parsed
    }
}

/// Builds a song entry for a media file given on the command line.
pub fn song_from_path(path: &Path) -> SongDescriptor {
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    SongDescriptor {
        title,
        media_path: absolute(path).display().to_string(),
        ..SongDescriptor::default()
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
