//! Main and monitor players kept in lockstep.

use std::future::Future;

use super::{OsdAlignment, Player, PlayerDeps};
use crate::error::PlayerResult;
use crate::state::{MediaType, PlayerKind, PlayerStatus, SongDescriptor};

/// The main player plus the optional monitor mirroring it.
///
/// Every command goes to both. Failures of the main player are returned;
/// the monitor only logs its own.
#[derive(Clone)]
pub struct Players {
    main: Player,
    monitor: Option<Player>,
}

impl Players {
    /// Creates the main player, and the monitor when enabled in configuration.
    #[must_use]
    pub fn new(deps: PlayerDeps) -> Self {
        let monitor_enabled = deps.config.read().monitor_enabled;
        let main = Player::new(PlayerKind::Main, deps.clone());
        let monitor = monitor_enabled.then(|| {
            let monitor = Player::new(PlayerKind::Monitor, deps);
            main.link_peer(&monitor);
            monitor
        });
        Self { main, monitor }
    }

    #[must_use]
    pub fn main(&self) -> &Player {
        &self.main
    }

    #[must_use]
    pub fn monitor(&self) -> Option<&Player> {
        self.monitor.as_ref()
    }

    /// Status of the main player.
    #[must_use]
    pub fn status(&self) -> PlayerStatus {
        self.main.status()
    }

    async fn both<F, Fut>(&self, action: F) -> PlayerResult<()>
    where
        F: Fn(Player) -> Fut,
        Fut: Future<Output = PlayerResult<()>>,
    {
        let main = action(self.main.clone());
        match &self.monitor {
            Some(monitor) => {
                let (main, mirrored) = tokio::join!(main, action(monitor.clone()));
                if let Err(e) = mirrored {
                    log::warn!("[Player:monitor] Command failed: {}", e);
                }
                main
            }
            None => main.await,
        }
    }

    pub async fn start(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.start().await }).await
    }

    pub async fn shutdown(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.shutdown().await }).await
    }

    pub async fn recreate(&self, restart: bool) -> PlayerResult<()> {
        self.both(move |p| async move { p.recreate(None, restart).await })
            .await
    }

    pub async fn play(&self, song: SongDescriptor) -> PlayerResult<()> {
        self.both(|p| {
            let song = song.clone();
            async move { p.play(song).await }
        })
        .await
    }

    pub async fn play_media(&self, song: SongDescriptor, media_type: MediaType) -> PlayerResult<()> {
        self.both(|p| {
            let song = song.clone();
            async move { p.play_media(song, media_type).await }
        })
        .await
    }

    pub async fn display_background(
        &self,
        media_type: MediaType,
        image: Option<&str>,
    ) -> PlayerResult<()> {
        self.both(move |p| async move { p.display_background(media_type, image).await })
            .await
    }

    pub async fn stop(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.stop().await }).await
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.pause().await }).await
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.resume().await }).await
    }

    pub async fn toggle_pause(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.toggle_pause().await }).await
    }

    pub async fn seek(&self, position: f64) -> PlayerResult<()> {
        self.both(move |p| async move { p.seek(position).await })
            .await
    }

    pub async fn seek_relative(&self, delta: f64) -> PlayerResult<()> {
        self.both(move |p| async move { p.seek_relative(delta).await })
            .await
    }

    pub async fn toggle_subs(&self) -> PlayerResult<()> {
        self.both(|p| async move { p.toggle_subs().await }).await
    }

    pub async fn set_subtitle_track(&self, track: i64) -> PlayerResult<()> {
        self.both(move |p| async move { p.set_subtitle_track(track).await })
            .await
    }

    pub async fn set_audio_track(&self, track: i64) -> PlayerResult<()> {
        self.both(move |p| async move { p.set_audio_track(track).await })
            .await
    }

    pub async fn set_game_mode(&self, enabled: bool) -> PlayerResult<()> {
        self.both(move |p| async move { p.set_game_mode(enabled).await })
            .await
    }

    pub async fn set_on_top(&self, on_top: bool) -> PlayerResult<()> {
        self.both(move |p| async move { p.set_on_top(on_top).await })
            .await
    }

    // Audio and window state only concern the main player

    pub async fn set_volume(&self, volume: u8) -> PlayerResult<()> {
        self.main.set_volume(volume).await
    }

    pub async fn set_mute(&self, mute: bool) -> PlayerResult<()> {
        self.main.set_mute(mute).await
    }

    pub async fn set_audio_device(&self, device: &str) -> PlayerResult<()> {
        self.main.set_audio_device(device).await
    }

    pub async fn toggle_fullscreen(&self) -> PlayerResult<()> {
        self.main.toggle_fullscreen().await
    }

    pub async fn display_message(&self, text: &str, seconds: Option<u64>) -> PlayerResult<()> {
        self.main
            .display_message(
                text,
                seconds.map(std::time::Duration::from_secs),
                OsdAlignment::Center,
            )
            .await
    }
}
