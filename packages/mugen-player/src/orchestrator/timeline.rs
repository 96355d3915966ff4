//! Position-driven side effects of the current song.
//!
//! [`evaluate`] is pure: given the status after a position update it returns
//! the actions to perform. [`apply`] records the one-shot flags and display
//! change so each action fires once per song.

use crate::protocol_constants::{
    MID_SONG_WINDOW_SECS, NEXT_SONG_NOTICE_SECS, POLL_END_SECS, SONG_INFO_WINDOW_SECS,
};
use crate::state::{InfoDisplay, MediaType, PlayerStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineAction {
    /// Announce the next song.
    NotifyNextSong,
    /// Close the audience poll.
    EndPoll,
    /// Switch the informational display.
    Display(InfoDisplay),
    /// Forward the position to the quiz game.
    GamePosition { position: f64, duration: f64 },
}

/// Display wanted at `position`: song info near both ends, banner around the
/// middle, nothing otherwise.
#[must_use]
pub fn display_for(position: f64, duration: f64) -> InfoDisplay {
    if position <= SONG_INFO_WINDOW_SECS || position >= duration - SONG_INFO_WINDOW_SECS {
        InfoDisplay::SongInfo
    } else if (position - duration / 2.0).abs() <= MID_SONG_WINDOW_SECS {
        InfoDisplay::Banner
    } else {
        InfoDisplay::None
    }
}

#[must_use]
pub fn evaluate(status: &PlayerStatus, poll_enabled: bool) -> Vec<TimelineAction> {
    let duration = status.duration();
    if status.media_type != MediaType::Song || duration <= 0.0 {
        return Vec::new();
    }

    let position = status.position;
    let mut actions = Vec::new();

    if status.game_mode {
        actions.push(TimelineAction::GamePosition { position, duration });
    } else {
        let wanted = display_for(position, duration);
        if wanted != status.info_display {
            actions.push(TimelineAction::Display(wanted));
        }
    }

    if !status.flags.next_song_notified && position > duration - NEXT_SONG_NOTICE_SECS {
        actions.push(TimelineAction::NotifyNextSong);
    }

    if poll_enabled && !status.flags.poll_ended && position > duration - POLL_END_SECS {
        actions.push(TimelineAction::EndPoll);
    }

    actions
}

/// Records the state changes implied by `actions`.
pub fn apply(status: &mut PlayerStatus, actions: &[TimelineAction]) {
    for action in actions {
        match action {
            TimelineAction::NotifyNextSong => status.flags.next_song_notified = true,
            TimelineAction::EndPoll => status.flags.poll_ended = true,
            TimelineAction::Display(display) => status.info_display = *display,
            TimelineAction::GamePosition { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SongDescriptor;

    fn song_status(duration: f64) -> PlayerStatus {
        PlayerStatus {
            media_type: MediaType::Song,
            current_song: Some(SongDescriptor {
                duration,
                ..SongDescriptor::default()
            }),
            ..PlayerStatus::default()
        }
    }

    fn step(status: &mut PlayerStatus, position: f64, poll: bool) -> Vec<TimelineAction> {
        status.position = position;
        let actions = evaluate(status, poll);
        apply(status, &actions);
        actions
    }

    #[test]
    fn display_windows() {
        assert_eq!(display_for(3.0, 100.0), InfoDisplay::SongInfo);
        assert_eq!(display_for(20.0, 100.0), InfoDisplay::None);
        assert_eq!(display_for(47.0, 100.0), InfoDisplay::Banner);
        assert_eq!(display_for(54.0, 100.0), InfoDisplay::Banner);
        assert_eq!(display_for(60.0, 100.0), InfoDisplay::None);
        assert_eq!(display_for(95.0, 100.0), InfoDisplay::SongInfo);
    }

    #[test]
    fn next_song_notice_fires_once_across_seeks() {
        let mut status = song_status(60.0);
        let mut notices = 0;
        for position in [10.0, 40.0, 46.0, 50.0, 20.0, 47.0, 55.0] {
            notices += step(&mut status, position, false)
                .iter()
                .filter(|a| **a == TimelineAction::NotifyNextSong)
                .count();
        }
        assert_eq!(notices, 1);
    }

    #[test]
    fn poll_ends_once_only_when_enabled() {
        let mut status = song_status(60.0);
        assert!(!step(&mut status, 55.0, false).contains(&TimelineAction::EndPoll));

        let mut status = song_status(60.0);
        assert!(!step(&mut status, 49.0, true).contains(&TimelineAction::EndPoll));
        assert!(step(&mut status, 51.0, true).contains(&TimelineAction::EndPoll));
        assert!(!step(&mut status, 52.0, true).contains(&TimelineAction::EndPoll));
    }

    #[test]
    fn display_changes_are_reported_once() {
        let mut status = song_status(100.0);
        assert_eq!(
            step(&mut status, 1.0, false),
            vec![TimelineAction::Display(InfoDisplay::SongInfo)]
        );
        assert!(step(&mut status, 2.0, false).is_empty());
        assert_eq!(
            step(&mut status, 12.0, false),
            vec![TimelineAction::Display(InfoDisplay::None)]
        );
    }

    #[test]
    fn game_mode_replaces_displays() {
        let mut status = song_status(100.0);
        status.game_mode = true;
        let actions = step(&mut status, 3.0, false);
        assert_eq!(
            actions,
            vec![TimelineAction::GamePosition {
                position: 3.0,
                duration: 100.0
            }]
        );
        assert_eq!(status.info_display, InfoDisplay::None);
    }

    #[test]
    fn background_media_has_no_timeline() {
        let mut status = song_status(100.0);
        status.media_type = MediaType::Pause;
        assert!(step(&mut status, 95.0, true).is_empty());
    }
}
