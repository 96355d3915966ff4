//! In-memory playlist driving the players.
//!
//! The player core reports song ends and remote skips through
//! [`PlaylistControl`]; [`QueueControl`] forwards them to the host loop, which
//! owns the [`Playlist`] and issues the next `play()`.

use async_trait::async_trait;
use mugen_player::{PlayerError, PlayerResult, PlaylistControl, SongDescriptor};
use tokio::sync::mpsc;

/// Requested playlist movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next,
    Previous,
}

/// Ordered songs with a cursor.
#[derive(Debug, Default)]
pub struct Playlist {
    songs: Vec<SongDescriptor>,
    cursor: Option<usize>,
    repeat: bool,
}

impl Playlist {
    pub fn new(songs: Vec<SongDescriptor>, repeat: bool) -> Self {
        Self {
            songs,
            cursor: None,
            repeat,
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Moves the cursor and returns the song to play, or `None` when the
    /// playlist is over.
    pub fn step(&mut self, advance: Advance) -> Option<SongDescriptor> {
        if self.songs.is_empty() {
            return None;
        }
        let last = self.songs.len() - 1;
        let next = match (advance, self.cursor) {
            (Advance::Next, None) => Some(0),
            (Advance::Next, Some(i)) if i < last => Some(i + 1),
            (Advance::Next, Some(_)) => self.repeat.then_some(0),
            // Going back from the first song replays it
            (Advance::Previous, None) => Some(0),
            (Advance::Previous, Some(i)) => Some(i.saturating_sub(1)),
        };

        self.cursor = next;
        next.map(|i| self.songs[i].clone())
    }

    /// 1-based position of the current song, for logs.
    pub fn position(&self) -> Option<usize> {
        self.cursor.map(|i| i + 1)
    }
}

/// [`PlaylistControl`] forwarding to the host loop.
#[derive(Debug, Clone)]
pub struct QueueControl {
    tx: mpsc::UnboundedSender<Advance>,
}

impl QueueControl {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Advance>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn request(&self, advance: Advance) -> PlayerResult<()> {
        self.tx
            .send(advance)
            .map_err(|_| PlayerError::Playlist("playlist loop has stopped".to_string()))
    }
}

#[async_trait]
impl PlaylistControl for QueueControl {
    async fn song_ended(&self) -> PlayerResult<()> {
        self.request(Advance::Next)
    }

    async fn next(&self) -> PlayerResult<()> {
        self.request(Advance::Next)
    }

    async fn previous(&self) -> PlayerResult<()> {
        self.request(Advance::Previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn songs(titles: &[&str]) -> Vec<SongDescriptor> {
        titles
            .iter()
            .map(|t| SongDescriptor {
                title: (*t).to_string(),
                media_path: format!("/medias/{}.mp4", t),
                ..SongDescriptor::default()
            })
            .collect()
    }

    fn titles(playlist: &mut Playlist, steps: &[Advance]) -> Vec<Option<String>> {
        steps
            .iter()
            .map(|&a| playlist.step(a).map(|s| s.title))
            .collect()
    }

    #[test]
    fn plays_through_and_stops() {
        let mut playlist = Playlist::new(songs(&["a", "b"]), false);
        assert_eq!(
            titles(&mut playlist, &[Advance::Next, Advance::Next, Advance::Next]),
            vec![Some("a".into()), Some("b".into()), None]
        );
        assert_eq!(playlist.position(), None);
    }

    #[test]
    fn repeat_wraps_around() {
        let mut playlist = Playlist::new(songs(&["a", "b"]), true);
        assert_eq!(
            titles(&mut playlist, &[Advance::Next, Advance::Next, Advance::Next]),
            vec![Some("a".into()), Some("b".into()), Some("a".into())]
        );
    }

    #[test]
    fn previous_stops_at_first_song() {
        let mut playlist = Playlist::new(songs(&["a", "b", "c"]), false);
        assert_eq!(
            titles(
                &mut playlist,
                &[Advance::Next, Advance::Next, Advance::Previous, Advance::Previous]
            ),
            vec![Some("a".into()), Some("b".into()), Some("a".into()), Some("a".into())]
        );
        assert_eq!(playlist.position(), Some(1));
    }

    #[test]
    fn empty_playlist_has_nothing_to_play() {
        let mut playlist = Playlist::new(Vec::new(), true);
        assert!(playlist.is_empty());
        assert_eq!(playlist.step(Advance::Next).map(|s| s.title), None);
    }

    #[tokio::test]
    async fn control_forwards_requests() {
        let (control, mut rx) = QueueControl::new();
        control.song_ended().await.unwrap();
        control.previous().await.unwrap();
        assert_eq!(rx.recv().await, Some(Advance::Next));
        assert_eq!(rx.recv().await, Some(Advance::Previous));

        drop(rx);
        assert!(matches!(control.next().await, Err(PlayerError::Playlist(_))));
    }
}
