//! The play queue and the library state that travels with it
//!
//! [`QueueStore`] is the single owner of the queue. Mutators publish
//! [`QueueEvent`]s to every subscriber; the session listens and loads the
//! new current track. The queue itself never touches the engine.

pub mod library;

pub use library::{Album, Library, LibraryState, Playlist, RecentSearch, SearchKind};

use crate::audio::Track;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The current track changed, or playing it was asked for explicitly
    CurrentChanged { index: usize, track: Track },
    PlayingChanged(bool),
    /// The queue is empty; nothing is current
    Emptied,
}

pub struct QueueStore {
    queue: Vec<Track>,
    current: Option<usize>,
    is_playing: bool,
    library: Library,
    subscribers: Vec<mpsc::UnboundedSender<QueueEvent>>,
}

impl QueueStore {
    pub fn new(library: Library) -> Self {
        Self {
            queue: Vec::new(),
            current: None,
            is_playing: false,
            library,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: QueueEvent) {
        debug!("queue event: {}", describe(&event));
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn publish_current(&mut self) {
        match self.current_track().cloned() {
            Some(track) => {
                let index = self.current.unwrap_or_default();
                self.publish(QueueEvent::CurrentChanged { index, track });
            }
            None => self.publish(QueueEvent::Emptied),
        }
    }

    fn set_playing_flag(&mut self, playing: bool) {
        let playing = playing && self.current.is_some();
        if self.is_playing != playing {
            self.is_playing = playing;
            self.publish(QueueEvent::PlayingChanged(playing));
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|i| self.queue.get(i))
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Replace the queue and start from its first track
    pub fn set_queue(&mut self, tracks: Vec<Track>) {
        self.queue = tracks;
        self.current = if self.queue.is_empty() { None } else { Some(0) };
        self.publish_current();
        self.set_playing_flag(true);
    }

    /// Append; the current track is left alone
    pub fn add_to_queue(&mut self, track: Track) {
        self.queue.push(track);
    }

    /// No-op on the last track
    pub fn play_next(&mut self) -> bool {
        match self.current {
            Some(i) if i + 1 < self.queue.len() => {
                self.current = Some(i + 1);
                self.publish_current();
                true
            }
            _ => false,
        }
    }

    /// No-op on the first track
    pub fn play_prev(&mut self) -> bool {
        match self.current {
            Some(i) if i > 0 => {
                self.current = Some(i - 1);
                self.publish_current();
                true
            }
            _ => false,
        }
    }

    /// Out-of-range indices are ignored
    pub fn play_at_index(&mut self, index: usize) -> bool {
        if index >= self.queue.len() {
            return false;
        }
        self.current = Some(index);
        self.publish_current();
        self.set_playing_flag(true);
        true
    }

    /// Remove one track, keeping the pointer on the same track where possible
    pub fn remove_from_queue(&mut self, index: usize) -> Option<Track> {
        if index >= self.queue.len() {
            return None;
        }
        let before = self.current_track().map(|t| t.id);
        let removed = self.queue.remove(index);

        self.current = match self.current {
            _ if self.queue.is_empty() => None,
            Some(c) if index < c => Some(c - 1),
            Some(c) if c >= self.queue.len() => Some(self.queue.len() - 1),
            other => other,
        };

        if self.current.is_none() {
            self.publish(QueueEvent::Emptied);
            self.set_playing_flag(false);
        } else if self.current_track().map(|t| t.id) != before {
            self.publish_current();
        }
        Some(removed)
    }

    pub fn toggle_play(&mut self) {
        self.set_playing_flag(!self.is_playing);
    }

    /// `true` is ignored while nothing is current
    pub fn set_playing(&mut self, playing: bool) {
        self.set_playing_flag(playing);
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut Library {
        &mut self.library
    }

    /// Queued tracks that are favorites
    pub fn favorite_tracks(&self) -> Vec<Track> {
        self.queue
            .iter()
            .filter(|t| self.library.is_favorite(t.id))
            .cloned()
            .collect()
    }

    pub fn volume(&self) -> f32 {
        self.library.volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.library.set_volume(volume);
    }
}

fn describe(event: &QueueEvent) -> String {
    match event {
        QueueEvent::CurrentChanged { index, track } => {
            format!("current -> {} ({})", index, track.display_title())
        }
        QueueEvent::PlayingChanged(playing) => format!("playing -> {}", playing),
        QueueEvent::Emptied => "emptied".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track::remote(format!("https://example.org/{}.mp3", i)).with_title(format!("t{}", i)))
            .collect()
    }

    fn store() -> (QueueStore, mpsc::UnboundedReceiver<QueueEvent>) {
        let mut store = QueueStore::new(Library::in_memory());
        let rx = store.subscribe();
        (store, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn current_changes(events: &[QueueEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::CurrentChanged { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_set_queue_starts_at_first_track() {
        let (mut store, mut rx) = store();
        store.set_queue(tracks(3));
        assert_eq!(store.current_index(), Some(0));
        assert!(store.is_playing());
        assert_eq!(current_changes(&drain(&mut rx)), vec![0]);

        store.set_queue(Vec::new());
        assert_eq!(store.current_index(), None);
        assert!(!store.is_playing());
        assert!(matches!(drain(&mut rx).first(), Some(QueueEvent::Emptied)));
    }

    #[test]
    fn test_next_is_bounded() {
        let (mut store, mut rx) = store();
        store.set_queue(tracks(3));
        store.play_at_index(2);
        drain(&mut rx);

        assert!(!store.play_next());
        assert_eq!(store.current_index(), Some(2));
        assert!(drain(&mut rx).is_empty());

        store.play_at_index(0);
        assert!(!store.play_prev());
        assert_eq!(store.current_index(), Some(0));
    }

    #[test]
    fn test_add_to_empty_queue_keeps_nothing_current() {
        let (mut store, mut rx) = store();
        store.add_to_queue(tracks(1).remove(0));
        assert_eq!(store.current_index(), None);
        assert!(drain(&mut rx).is_empty());

        store.set_playing(true);
        assert!(!store.is_playing());
    }

    #[test]
    fn test_remove_before_current_shifts_pointer() {
        let (mut store, mut rx) = store();
        let queue = tracks(4);
        let t2 = queue[2].id;
        store.set_queue(queue);
        store.play_at_index(2);
        drain(&mut rx);

        store.remove_from_queue(0);
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current_track().map(|t| t.id), Some(t2));
        // same track, nothing to reload
        assert!(current_changes(&drain(&mut rx)).is_empty());
    }

    #[test]
    fn test_remove_current_moves_to_following_track() {
        let (mut store, mut rx) = store();
        store.set_queue(tracks(3));
        store.play_at_index(1);
        drain(&mut rx);

        store.remove_from_queue(1);
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current_track().unwrap().display_title(), "t2");
        assert_eq!(current_changes(&drain(&mut rx)), vec![1]);

        // removing the last (current) track steps back
        store.remove_from_queue(1);
        assert_eq!(store.current_index(), Some(0));
        assert_eq!(current_changes(&drain(&mut rx)), vec![0]);

        store.remove_from_queue(0);
        assert_eq!(store.current_index(), None);
        assert!(!store.is_playing());
        assert!(store.remove_from_queue(0).is_none());
    }

    #[test]
    fn test_toggle_play_publishes() {
        let (mut store, mut rx) = store();
        store.set_queue(tracks(1));
        drain(&mut rx);

        store.toggle_play();
        assert!(!store.is_playing());
        assert!(matches!(drain(&mut rx).as_slice(), [QueueEvent::PlayingChanged(false)]));
    }

    #[test]
    fn test_favorite_tracks_come_from_queue() {
        let (mut store, _rx) = store();
        let queue = tracks(3);
        let fav = queue[1].id;
        store.set_queue(queue);
        store.library_mut().toggle_favorite(fav);
        store.library_mut().toggle_favorite(uuid::Uuid::new_v4());

        let favorites = store.favorite_tracks();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, fav);
    }
}
