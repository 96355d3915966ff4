//! Collaborators the player core consumes from the host application.
//!
//! - [`DisplayDetector`]: screen resolution for window geometry
//! - [`PlaylistControl`]: playlist advance for song end and remote commands

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PlayerResult;

/// Trait for detecting the resolution of the screen the player opens on.
pub trait DisplayDetector: Send + Sync {
    /// Returns `(width, height)` in pixels, or `None` if unknown.
    fn resolution(&self, screen: Option<u32>) -> Option<(u32, u32)>;
}

/// Detector reporting a fixed resolution (from configuration or the host UI).
#[derive(Debug, Clone, Copy)]
pub struct FixedDisplay {
    pub width: u32,
    pub height: u32,
}

impl FixedDisplay {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn arc(width: u32, height: u32) -> Arc<dyn DisplayDetector> {
        Arc::new(Self::new(width, height))
    }
}

impl DisplayDetector for FixedDisplay {
    fn resolution(&self, _screen: Option<u32>) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }
}

/// Detector for headless hosts; geometry falls back to the default resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDisplayDetector;

impl DisplayDetector for NoDisplayDetector {
    fn resolution(&self, _screen: Option<u32>) -> Option<(u32, u32)> {
        None
    }
}

/// Playlist operations owned by the application.
///
/// Failures are reported as `PlayerError::Playlist`; the player logs them and
/// keeps running.
#[async_trait]
pub trait PlaylistControl: Send + Sync {
    /// The current song reached its natural end.
    async fn song_ended(&self) -> PlayerResult<()>;

    /// Skip to the next song.
    async fn next(&self) -> PlayerResult<()>;

    /// Go back to the previous song.
    async fn previous(&self) -> PlayerResult<()>;
}

/// Playlist control that does nothing, for hosts without a playlist.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlaylist;

#[async_trait]
impl PlaylistControl for NoPlaylist {
    async fn song_ended(&self) -> PlayerResult<()> {
        Ok(())
    }

    async fn next(&self) -> PlayerResult<()> {
        Ok(())
    }

    async fn previous(&self) -> PlayerResult<()> {
        Ok(())
    }
}
