//! Playback commands of a [`Player`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{Connection, Player};
use crate::error::{PlayerError, PlayerResult};
use crate::filter_graph::{generate_composition, CompositionOptions, CompositionSong, Platform};
use crate::ipc::TransportEvent;
use crate::protocol_constants::{
    INFO_OVERLAY_ID, MESSAGE_OVERLAY_ID, PROP_FULLSCREEN, PROP_MUTE, PROP_PAUSE, PROP_TIME_POS,
    PROP_VOLUME,
};
use crate::state::{InfoDisplay, MediaType, PlaybackState, SongDescriptor};
use crate::state_adapter::{normalize_position, PropertyStream};

/// Screen position of an OSD message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OsdAlignment {
    Top,
    #[default]
    Center,
    Bottom,
}

impl OsdAlignment {
    /// ASS numpad alignment tag.
    fn tag(self) -> &'static str {
        match self {
            Self::Top => r"{\an8}",
            Self::Center => r"{\an5}",
            Self::Bottom => r"{\an2}",
        }
    }
}

/// Escapes text for an ASS event line.
fn escape_ass(text: &str) -> String {
    text.replace('\\', r"\\")
        .replace('{', r"\{")
        .replace('}', r"\}")
        .replace('\n', r"\N")
}

fn overlay(id: u64, data: Option<String>) -> Value {
    match data {
        Some(data) => json!({
            "name": "osd-overlay",
            "id": id,
            "format": "ass-events",
            "data": data,
        }),
        None => json!({
            "name": "osd-overlay",
            "id": id,
            "format": "none",
            "data": "",
        }),
    }
}

fn path_list_separator(platform: Platform) -> &'static str {
    match platform {
        Platform::Windows => ";",
        _ => ":",
    }
}

impl Player {
    // ─────────────────────────────────────────────────────────────────────────
    // Media loading
    // ─────────────────────────────────────────────────────────────────────────

    /// Loads and plays a song, replacing the current media.
    ///
    /// The subtitle track is selected again once the position first moves,
    /// after the player finished loading the file.
    pub async fn play(&self, song: SongDescriptor) -> PlayerResult<()> {
        self.play_media(song, MediaType::Song).await
    }

    /// Loads and plays any media that ends with a playlist advance
    /// (songs, jingles, sponsors, intros...).
    pub async fn play_media(&self, song: SongDescriptor, media_type: MediaType) -> PlayerResult<()> {
        if song.media_path.trim().is_empty() {
            return Err(PlayerError::InvalidMedia(format!(
                "{:?} has no media path",
                song.title
            )));
        }
        let inner = &self.inner;
        let conn = inner.connection()?;

        inner.operating.store(true, Ordering::SeqCst);
        let result = self.load_song(&song, media_type, &conn).await;
        inner.operating.store(false, Ordering::SeqCst);
        result?;

        inner.suppress_pause.store(false, Ordering::SeqCst);
        inner.set_property(PROP_PAUSE, json!(false)).await?;
        inner.state.update(|s| s.playback = PlaybackState::Playing);
        log::info!(
            "[Player:{}] Playing {:?} ({:?})",
            inner.label(),
            song.title,
            media_type
        );
        inner.emit_state();
        Ok(())
    }

    async fn load_song(
        &self,
        song: &SongDescriptor,
        media_type: MediaType,
        conn: &Connection,
    ) -> PlayerResult<()> {
        let inner = &self.inner;
        let options = self.load_options(song);

        inner.state.begin_media(Some(song.clone()), media_type);
        self.cancel_subtitle_follow_up();
        if let Some(track) = song.subtitle_track {
            // Subscribe before loading so neither the load nor the first
            // position is missed
            let observation = conn.adapter.subscribe(PROP_TIME_POS).await?;
            let events = conn.transport.subscribe();
            self.spawn_subtitle_follow_up(observation, events, track);
        }

        let command = json!({
            "name": "loadfile",
            "url": song.media_path,
            "flags": "replace",
            "options": options,
        });
        if let Err(e) = inner.command(command).await {
            self.cancel_subtitle_follow_up();
            return Err(e);
        }
        Ok(())
    }

    /// Per-file options for `loadfile`, including the filter graph.
    fn load_options(&self, song: &SongDescriptor) -> Map<String, Value> {
        let inner = &self.inner;
        let composition_options = {
            let config = inner.deps.config.read();
            CompositionOptions {
                show_video: !song.audio_only,
                show_avatar: config.show_avatar,
                show_qr_code: config.show_qr_code,
                qr_code_image: config.qr_code_image.clone(),
                avatar_crop_ratio: config.avatar_crop_ratio,
            }
        };
        let composition = generate_composition(
            &CompositionSong {
                duration: song.duration,
                loudnorm: song.loudnorm.clone(),
                avatar: song.avatar.clone(),
            },
            &composition_options,
            &inner.capabilities.read(),
        );

        let mut options = Map::new();
        if !composition.is_empty() {
            options.insert("lavfi-complex".into(), json!(composition.lavfi_complex));
        }
        if !composition.external_files.is_empty() {
            let separator = path_list_separator(inner.deps.platform);
            options.insert(
                "external-files".into(),
                json!(composition.external_files.join(separator)),
            );
        }
        if let Some(subfile) = &song.subfile {
            options.insert("sub-files".into(), json!(subfile));
        }
        if let Some(start) = song.start.filter(|s| *s > 0.0) {
            options.insert("start".into(), json!(start.to_string()));
        }
        if let Some(track) = song.audio_track {
            options.insert("aid".into(), json!(track.to_string()));
        }
        if let Some(track) = song.subtitle_track {
            options.insert("sid".into(), json!(track.to_string()));
        }
        if song.audio_only {
            options.insert("force-window".into(), json!("yes"));
        }
        options
    }

    fn cancel_subtitle_follow_up(&self) {
        if let Some(token) = self.inner.subtitle_follow_up.lock().take() {
            token.cancel();
        }
    }

    /// Selects `track` once the new file is loaded and its position moves.
    ///
    /// Positions are read from the transport events, in socket order, so a
    /// reading still in flight from the previous file is never mistaken for
    /// the new one. `observation` keeps the position observed meanwhile.
    fn spawn_subtitle_follow_up(
        &self,
        observation: PropertyStream,
        mut events: broadcast::Receiver<TransportEvent>,
        track: i64,
    ) {
        let token = CancellationToken::new();
        *self.inner.subtitle_follow_up.lock() = Some(token.clone());
        let weak = Arc::downgrade(&self.inner);

        self.inner.spawner.spawn(async move {
            let first_position = async {
                let mut loaded = false;
                loop {
                    match events.recv().await {
                        Ok(TransportEvent::FileLoaded) => loaded = true,
                        Ok(TransportEvent::PropertyChange { name, data })
                            if loaded && name == PROP_TIME_POS =>
                        {
                            if normalize_position(&data) > 0.0 {
                                return true;
                            }
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return false,
                    }
                }
            };
            let started = tokio::select! {
                _ = token.cancelled() => false,
                started = first_position => started,
            };
            drop(observation);
            if !started {
                return;
            }
            let Some(inner) = weak.upgrade() else { return };
            match inner.set_property("sid", json!(track)).await {
                Ok(()) => log::debug!("[Player:{}] Subtitle track {} selected", inner.label(), track),
                Err(e) => log::warn!("[Player:{}] Could not select subtitles: {}", inner.label(), e),
            }
        });
    }

    /// Shows a still background (stop, pause or poll screen).
    ///
    /// Falls back to the configured background image, and to an empty player
    /// when there is none.
    pub async fn display_background(
        &self,
        media_type: MediaType,
        image: Option<&str>,
    ) -> PlayerResult<()> {
        let inner = &self.inner;
        let image = image
            .map(str::to_string)
            .or_else(|| inner.deps.config.read().background_image.clone());

        self.cancel_subtitle_follow_up();
        inner.suppress_pause.store(false, Ordering::SeqCst);
        inner.state.begin_media(None, media_type);

        inner.operating.store(true, Ordering::SeqCst);
        let command = match &image {
            Some(path) => json!({
                "name": "loadfile",
                "url": path,
                "flags": "replace",
            }),
            None => json!(["stop"]),
        };
        let result = inner.command(command).await;
        inner.operating.store(false, Ordering::SeqCst);
        result?;

        inner.state.update(|s| s.playback = PlaybackState::Stopped);
        if let Err(e) = self.show_info_display(InfoDisplay::None).await {
            log::debug!("[Player:{}] Could not clear info display: {}", inner.label(), e);
        }
        log::debug!(
            "[Player:{}] Background {:?} ({})",
            inner.label(),
            media_type,
            image.as_deref().unwrap_or("none")
        );
        inner.emit_state();
        Ok(())
    }

    /// Stops playback and shows the stop screen.
    pub async fn stop(&self) -> PlayerResult<()> {
        self.display_background(MediaType::Stop, None).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport controls
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn pause(&self) -> PlayerResult<()> {
        self.inner.set_property(PROP_PAUSE, json!(true)).await
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.inner.set_property(PROP_PAUSE, json!(false)).await
    }

    /// Pauses when playing, resumes when paused. No-op while stopped.
    pub async fn toggle_pause(&self) -> PlayerResult<()> {
        match self.inner.state.read(|s| s.playback) {
            PlaybackState::Playing => self.pause().await,
            PlaybackState::Paused => self.resume().await,
            PlaybackState::Stopped => Ok(()),
        }
    }

    /// Seeks to an absolute position in seconds (negative values clamp to 0).
    pub async fn seek(&self, position: f64) -> PlayerResult<()> {
        let position = position.max(0.0);
        self.inner
            .command(json!(["seek", position, "absolute"]))
            .await?;
        Ok(())
    }

    pub async fn seek_relative(&self, delta: f64) -> PlayerResult<()> {
        self.inner.command(json!(["seek", delta, "relative"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: u8) -> PlayerResult<()> {
        let volume = volume.min(100);
        self.inner.set_property(PROP_VOLUME, json!(volume)).await?;
        self.inner.state.update(|s| s.volume = f64::from(volume));
        Ok(())
    }

    pub async fn set_mute(&self, mute: bool) -> PlayerResult<()> {
        self.inner.set_property(PROP_MUTE, json!(mute)).await?;
        self.inner.state.update(|s| s.mute = mute);
        Ok(())
    }

    pub async fn show_subs(&self) -> PlayerResult<()> {
        self.set_subs_visible(true).await
    }

    pub async fn hide_subs(&self) -> PlayerResult<()> {
        self.set_subs_visible(false).await
    }

    pub async fn toggle_subs(&self) -> PlayerResult<()> {
        let visible = self.inner.state.read(|s| s.show_subs);
        self.set_subs_visible(!visible).await
    }

    async fn set_subs_visible(&self, visible: bool) -> PlayerResult<()> {
        self.inner
            .set_property("sub-visibility", json!(visible))
            .await?;
        self.inner.state.update(|s| s.show_subs = visible);
        self.inner.emit_state();
        Ok(())
    }

    pub async fn set_audio_track(&self, track: i64) -> PlayerResult<()> {
        self.inner.set_property("aid", json!(track)).await?;
        self.inner.state.update(|s| s.audio_track = Some(track));
        self.inner.emit_state();
        Ok(())
    }

    pub async fn set_subtitle_track(&self, track: i64) -> PlayerResult<()> {
        self.inner.set_property("sid", json!(track)).await?;
        self.inner.state.update(|s| s.subtitle_track = Some(track));
        self.inner.emit_state();
        Ok(())
    }

    /// Changes fullscreen; the observed property change updates state and
    /// configuration.
    pub async fn set_fullscreen(&self, fullscreen: bool) -> PlayerResult<()> {
        self.inner
            .set_property(PROP_FULLSCREEN, json!(fullscreen))
            .await
    }

    pub async fn toggle_fullscreen(&self) -> PlayerResult<()> {
        let fullscreen = self.inner.state.read(|s| s.fullscreen);
        self.set_fullscreen(!fullscreen).await
    }

    pub async fn set_on_top(&self, on_top: bool) -> PlayerResult<()> {
        self.inner.set_property("ontop", json!(on_top)).await?;
        self.inner.state.update(|s| s.on_top = on_top);
        self.inner.emit_state();
        Ok(())
    }

    pub async fn set_audio_device(&self, device: &str) -> PlayerResult<()> {
        self.inner.set_property("audio-device", json!(device)).await?;
        self.inner
            .state
            .update(|s| s.audio_device = Some(device.to_string()));
        self.inner.emit_state();
        Ok(())
    }

    /// Enables quiz mode: position ticks go to the game instead of the info
    /// displays.
    pub async fn set_game_mode(&self, enabled: bool) -> PlayerResult<()> {
        let was_displaying = self.inner.state.update(|s| {
            s.game_mode = enabled;
            let displaying = s.info_display != InfoDisplay::None;
            if enabled {
                s.info_display = InfoDisplay::None;
            }
            displaying
        });
        if enabled && was_displaying {
            self.show_info_display(InfoDisplay::None).await?;
        }
        self.inner.emit_state();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // On-screen display
    // ─────────────────────────────────────────────────────────────────────────

    /// Shows a text message on the player OSD.
    ///
    /// With a duration the message clears itself; a newer message replaces
    /// the old one and its timer.
    pub async fn display_message(
        &self,
        text: &str,
        duration: Option<Duration>,
        alignment: OsdAlignment,
    ) -> PlayerResult<()> {
        let inner = &self.inner;
        if let Some(token) = inner.message_timer.lock().take() {
            token.cancel();
        }

        let data = format!("{}{}", alignment.tag(), escape_ass(text));
        inner.command(overlay(MESSAGE_OVERLAY_ID, Some(data))).await?;

        if let Some(duration) = duration {
            let token = CancellationToken::new();
            *inner.message_timer.lock() = Some(token.clone());
            let weak = Arc::downgrade(inner);
            inner.spawner.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        if let Some(inner) = weak.upgrade() {
                            if let Err(e) = inner.command(overlay(MESSAGE_OVERLAY_ID, None)).await {
                                log::debug!("[Player:{}] Could not clear message: {}", inner.label(), e);
                            }
                        }
                    }
                }
            });
        }
        Ok(())
    }

    pub async fn clear_message(&self) -> PlayerResult<()> {
        if let Some(token) = self.inner.message_timer.lock().take() {
            token.cancel();
        }
        self.inner
            .command(overlay(MESSAGE_OVERLAY_ID, None))
            .await?;
        Ok(())
    }

    /// Renders (or clears) the song info or banner display.
    pub(crate) async fn show_info_display(&self, display: InfoDisplay) -> PlayerResult<()> {
        let inner = &self.inner;
        let data = match display {
            InfoDisplay::None => None,
            InfoDisplay::SongInfo => inner.state.read(|s| s.current_song.as_ref().map(song_info)),
            InfoDisplay::Banner => {
                let text = inner.deps.config.read().banner_text.clone();
                (!text.trim().is_empty()).then(|| format!(r"{{\an1}}{}", escape_ass(&text)))
            }
        };
        inner.command(overlay(INFO_OVERLAY_ID, data)).await?;
        Ok(())
    }
}

/// ASS text of the song info display.
fn song_info(song: &SongDescriptor) -> String {
    let mut lines = Vec::new();
    let heading = song.heading();
    if !heading.is_empty() {
        lines.push(format!(r"{{\b1}}{}{{\b0}}", escape_ass(&heading)));
    }
    let mut title = escape_ass(&song.title);
    if let Some(version) = &song.version {
        title = format!("{} - {}", escape_ass(version), title);
    }
    lines.push(title);
    if let Some(requester) = &song.requester {
        lines.push(format!("Requested by {}", escape_ass(requester)));
    }
    format!(r"{{\an1}}{}", lines.join(r"\N"))
}
