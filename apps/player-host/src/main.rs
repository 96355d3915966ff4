//! Mugen Player Host - headless driver for the Karaoke Mugen player core.
//!
//! This binary starts the main player (and the monitor when enabled), plays a
//! playlist from the configuration file and the command line, and advances it
//! on song end or remote skip. It is meant for operator testing of the player
//! setup without the full application.

mod config;
mod queue;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mugen_player::{
    BroadcastEvent, BroadcastEventBridge, DisplayDetector, FixedDisplay, LoggingEventEmitter,
    MediaType, MpvTransportFactory, NoDisplayDetector, Platform, PlayerDeps, PlayerEvent, Players,
    TokioSpawner,
};
use parking_lot::RwLock;
use tokio::signal;
use tokio::sync::broadcast;

use crate::config::{song_from_path, HostConfig};
use crate::queue::{Advance, Playlist, QueueControl};

/// Event channel capacity for the host's listener.
const EVENT_CAPACITY: usize = 64;

/// Mugen Player Host - headless mpv driver for Karaoke Mugen.
#[derive(Parser, Debug)]
#[command(name = "mugen-player-host")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MUGEN_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Player binary (overrides config file).
    #[arg(long, value_name = "PATH", env = "MUGEN_MPV_BINARY")]
    mpv: Option<PathBuf>,

    /// Also open the monitor window (overrides config file).
    #[arg(short, long, env = "MUGEN_MONITOR")]
    monitor: bool,

    /// Start fullscreen (overrides config file).
    #[arg(short, long)]
    fullscreen: bool,

    /// Media files appended to the configured playlist.
    #[arg(value_name = "MEDIA")]
    media: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Mugen Player Host v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        HostConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(binary) = args.mpv {
        config.player.binary = binary;
    }
    if args.monitor {
        config.player.monitor_enabled = true;
    }
    if args.fullscreen {
        config.player.fullscreen = true;
    }

    let display: Arc<dyn DisplayDetector> = match config.resolution() {
        Some((width, height)) => FixedDisplay::arc(width, height),
        None => Arc::new(NoDisplayDetector),
    };

    let mut songs = std::mem::take(&mut config.playlist);
    songs.extend(args.media.iter().map(|p| song_from_path(p)));
    let mut playlist = Playlist::new(songs, config.repeat);
    log::info!(
        "Configuration: binary={}, monitor={}, songs={}",
        config.player.binary.display(),
        config.player.monitor_enabled,
        playlist.len()
    );

    let bridge = BroadcastEventBridge::new(EVENT_CAPACITY);
    bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    let events = bridge.subscribe();

    let (control, mut advances) = QueueControl::new();
    let players = Players::new(PlayerDeps {
        config: Arc::new(RwLock::new(config.player)),
        emitter: Arc::new(bridge),
        playlist: Arc::new(control),
        display,
        transports: Arc::new(MpvTransportFactory),
        spawner: Arc::new(TokioSpawner::current()),
        platform: Platform::current(),
    });

    players.start().await.context("Failed to start the player")?;
    log::info!("Player started");

    play_step(&players, &mut playlist, Advance::Next).await;

    let listener = tokio::spawn(log_events(events));

    // Run until a shutdown signal
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            advance = advances.recv() => match advance {
                Some(advance) => play_step(&players, &mut playlist, advance).await,
                None => break,
            },
        }
    }

    log::info!("Shutdown signal received, cleaning up...");

    if let Err(e) = players.shutdown().await {
        log::warn!("Player shutdown failed: {}", e);
    }
    listener.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Plays the next (or previous) song, or the stop screen once the playlist is over.
async fn play_step(players: &Players, playlist: &mut Playlist, advance: Advance) {
    let result = match playlist.step(advance) {
        Some(song) => {
            log::info!(
                "Playing {}/{}: {}",
                playlist.position().unwrap_or(0),
                playlist.len(),
                song.title
            );
            players.play(song).await
        }
        None => {
            log::info!("End of playlist");
            players.display_background(MediaType::Stop, None).await
        }
    };
    if let Err(e) = result {
        log::error!("Playback failed: {}", e);
    }
}

/// Logs notable player events.
async fn log_events(mut events: broadcast::Receiver<BroadcastEvent>) {
    loop {
        match events.recv().await {
            Ok(BroadcastEvent::Player(PlayerEvent::NextSongSoon)) => {
                log::info!("Next song coming up");
            }
            Ok(BroadcastEvent::Player(PlayerEvent::PollEnded)) => {
                log::info!("Poll ended");
            }
            Ok(BroadcastEvent::Player(PlayerEvent::StartupFailed {
                instance, error, ..
            })) => {
                log::error!("Player {} could not start: {}", instance, error);
            }
            Ok(BroadcastEvent::Player(PlayerEvent::Recreated { instance })) => {
                log::warn!("Player {} was recreated", instance);
            }
            Ok(BroadcastEvent::Config(event)) => {
                log::info!("Configuration changed: {:?}", event);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Event listener skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
