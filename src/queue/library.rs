use crate::audio::{Artwork, Track};
use crate::storage::DurableSlot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Key the library state is stored under
pub const LIBRARY_KEY: &str = "tonedeck-library";
pub const LIBRARY_VERSION: u32 = 1;
pub const MAX_RECENT_SEARCHES: usize = 20;

/// Represents a single playlist with metadata and its tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// Create a new empty playlist
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: now,
            modified_at: now,
            tracks: Vec::new(),
        }
    }

    /// Add a track to the playlist
    pub fn add_track(&mut self, track: Track) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        info!("Added track '{}' to playlist '{}'", track.display_title(), self.name);
        self.tracks.push(track);
        self.modified_at = Utc::now();
        true
    }

    /// Remove a track from the playlist by id
    pub fn remove_track(&mut self, track_id: Uuid) -> bool {
        if let Some(pos) = self.tracks.iter().position(|t| t.id == track_id) {
            let track = self.tracks.remove(pos);
            self.modified_at = Utc::now();
            info!("Removed track '{}' from playlist '{}'", track.display_title(), self.name);
            true
        } else {
            false
        }
    }

    /// Move a track to a different position in the playlist
    pub fn move_track(&mut self, from_index: usize, to_index: usize) -> bool {
        if from_index < self.tracks.len() && to_index < self.tracks.len() {
            let track = self.tracks.remove(from_index);
            self.tracks.insert(to_index, track);
            self.modified_at = Utc::now();
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Sum of the duration hints, in seconds
    pub fn total_duration(&self) -> Option<f64> {
        let total: f64 = self
            .tracks
            .iter()
            .filter_map(|t| t.metadata.duration_seconds)
            .sum();
        if total > 0.0 {
            Some(total)
        } else {
            None
        }
    }

    /// Get formatted duration string
    pub fn duration_string(&self) -> String {
        match self.total_duration() {
            Some(duration) => {
                let duration = duration as u64;
                let hours = duration / 3600;
                let minutes = (duration % 3600) / 60;
                let seconds = duration % 60;

                if hours > 0 {
                    format!("{}:{:02}:{:02}", hours, minutes, seconds)
                } else {
                    format!("{}:{:02}", minutes, seconds)
                }
            }
            None => "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Song,
    Artist,
    Album,
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSearch {
    pub id: Uuid,
    pub title: String,
    pub subtitle: Option<String>,
    pub image: Option<String>,
    pub kind: SearchKind,
    pub timestamp: DateTime<Utc>,
}

impl RecentSearch {
    pub fn new(title: impl Into<String>, kind: SearchKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            subtitle: None,
            image: None,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

/// Tracks grouped by (artist, album)
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub title: String,
    pub artist: String,
    pub artwork: Option<Artwork>,
    pub tracks: Vec<Track>,
}

/// Everything about the library that outlives a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryState {
    pub playlists: Vec<Playlist>,
    pub favorites: Vec<Uuid>,
    pub recent_searches: Vec<RecentSearch>,
    pub volume: f32,
}

impl Default for LibraryState {
    fn default() -> Self {
        Self {
            playlists: Vec::new(),
            favorites: Vec::new(),
            recent_searches: Vec::new(),
            volume: 1.0,
        }
    }
}

/// Library state plus the slot it is persisted in. Every mutation saves.
pub struct Library {
    state: LibraryState,
    slot: DurableSlot<LibraryState>,
}

impl Library {
    pub fn new(mut slot: DurableSlot<LibraryState>) -> Self {
        let state = slot.load();
        debug!(
            "library loaded: {} playlists, {} favorites",
            state.playlists.len(),
            state.favorites.len()
        );
        Self { state, slot }
    }

    pub fn in_memory() -> Self {
        Self::new(DurableSlot::in_memory(LIBRARY_KEY, LIBRARY_VERSION))
    }

    pub fn state(&self) -> &LibraryState {
        &self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.slot.is_degraded()
    }

    fn persist(&mut self) {
        self.slot.save(&self.state);
    }

    pub fn is_favorite(&self, track_id: Uuid) -> bool {
        self.state.favorites.contains(&track_id)
    }

    /// Returns whether the track is a favorite afterwards
    pub fn toggle_favorite(&mut self, track_id: Uuid) -> bool {
        let now_favorite = if let Some(pos) = self.state.favorites.iter().position(|id| *id == track_id) {
            self.state.favorites.remove(pos);
            false
        } else {
            self.state.favorites.push(track_id);
            true
        };
        self.persist();
        now_favorite
    }

    pub fn create_playlist(&mut self, name: impl Into<String>) -> Uuid {
        let playlist = Playlist::new(name.into());
        let id = playlist.id;
        info!("Created new playlist: '{}'", playlist.name);
        self.state.playlists.push(playlist);
        self.persist();
        id
    }

    pub fn playlist(&self, playlist_id: Uuid) -> Option<&Playlist> {
        self.state.playlists.iter().find(|p| p.id == playlist_id)
    }

    /// Unknown playlists are ignored
    /// Apply `edit` to one playlist, persisting when it reports a change
    fn edit_playlist(&mut self, playlist_id: Uuid, edit: impl FnOnce(&mut Playlist) -> bool) -> bool {
        let Some(playlist) = self.state.playlists.iter_mut().find(|p| p.id == playlist_id) else {
            return false;
        };
        let changed = edit(playlist);
        if changed {
            self.persist();
        }
        changed
    }

    pub fn add_to_playlist(&mut self, playlist_id: Uuid, track: Track) -> bool {
        self.edit_playlist(playlist_id, |p| p.add_track(track))
    }

    pub fn remove_from_playlist(&mut self, playlist_id: Uuid, track_id: Uuid) -> bool {
        self.edit_playlist(playlist_id, |p| p.remove_track(track_id))
    }

    pub fn move_in_playlist(&mut self, playlist_id: Uuid, from_index: usize, to_index: usize) -> bool {
        self.edit_playlist(playlist_id, |p| p.move_track(from_index, to_index))
    }

    pub fn delete_playlist(&mut self, playlist_id: Uuid) -> bool {
        let before = self.state.playlists.len();
        self.state.playlists.retain(|p| p.id != playlist_id);
        let deleted = self.state.playlists.len() != before;
        if deleted {
            info!("Deleted playlist {}", playlist_id);
            self.persist();
        }
        deleted
    }

    /// Newest first. An existing entry with the same title and kind is
    /// replaced, and the list never grows past [`MAX_RECENT_SEARCHES`].
    pub fn add_recent_search(&mut self, search: RecentSearch) {
        let search = RecentSearch {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            ..search
        };
        self.state
            .recent_searches
            .retain(|s| s.title != search.title || s.kind != search.kind);
        self.state.recent_searches.insert(0, search);
        self.state.recent_searches.truncate(MAX_RECENT_SEARCHES);
        self.persist();
    }

    pub fn remove_recent_search(&mut self, search_id: Uuid) {
        self.state.recent_searches.retain(|s| s.id != search_id);
        self.persist();
    }

    pub fn clear_recent_searches(&mut self) {
        self.state.recent_searches.clear();
        self.persist();
    }

    pub fn volume(&self) -> f32 {
        self.state.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 1.0 };
        if self.state.volume != volume {
            self.state.volume = volume;
            self.persist();
        }
    }

    /// Every playlist track grouped by artist and album, in first-seen order
    pub fn albums_by_artist(&self) -> Vec<Album> {
        let mut albums: Vec<Album> = Vec::new();

        for track in self.state.playlists.iter().flat_map(|p| p.tracks.iter()) {
            let artist = track.display_artist();
            let title = track.display_album();
            match albums.iter_mut().find(|a| a.artist == artist && a.title == title) {
                Some(album) => album.tracks.push(track.clone()),
                None => albums.push(Album {
                    title,
                    artist,
                    artwork: track.artwork.clone(),
                    tracks: vec![track.clone()],
                }),
            }
        }

        albums
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TrackMetadata;
    use tempfile::TempDir;

    fn track(title: &str, artist: &str, album: &str) -> Track {
        Track::remote(format!("https://example.org/{}.mp3", title)).with_metadata(TrackMetadata {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            duration_seconds: Some(90.0),
        })
    }

    #[test]
    fn test_recent_searches_dedupe_and_cap() {
        let mut library = Library::in_memory();
        library.add_recent_search(RecentSearch::new("Blue", SearchKind::Song));
        library.add_recent_search(RecentSearch::new("Blue", SearchKind::Album));
        library.add_recent_search(RecentSearch::new("Blue", SearchKind::Song).with_subtitle("again"));

        let searches = &library.state().recent_searches;
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[0].kind, SearchKind::Song);
        assert_eq!(searches[0].subtitle.as_deref(), Some("again"));

        for i in 0..30 {
            library.add_recent_search(RecentSearch::new(format!("q{}", i), SearchKind::Artist));
        }
        let searches = &library.state().recent_searches;
        assert_eq!(searches.len(), MAX_RECENT_SEARCHES);
        assert_eq!(searches[0].title, "q29");

        let id = searches[0].id;
        library.remove_recent_search(id);
        assert_eq!(library.state().recent_searches[0].title, "q28");
        library.clear_recent_searches();
        assert!(library.state().recent_searches.is_empty());
    }

    #[test]
    fn test_playlists_and_albums() {
        let mut library = Library::in_memory();
        let mix = library.create_playlist("Mix");
        let other = library.create_playlist("Other");

        let a1 = track("a1", "Ana", "First");
        assert!(library.add_to_playlist(mix, a1.clone()));
        assert!(!library.add_to_playlist(mix, a1.clone()));
        assert!(library.add_to_playlist(mix, track("b1", "Bo", "Solo")));
        assert!(library.add_to_playlist(other, track("a2", "Ana", "First")));
        assert!(!library.add_to_playlist(Uuid::new_v4(), track("x", "X", "X")));

        let albums = library.albums_by_artist();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].artist, "Ana");
        assert_eq!(albums[0].tracks.len(), 2);
        assert_eq!(albums[1].title, "Solo");

        assert_eq!(library.playlist(mix).unwrap().duration_string(), "3:00");
        assert!(library.delete_playlist(other));
        assert!(!library.delete_playlist(other));
        assert_eq!(library.albums_by_artist()[0].tracks.len(), 1);
    }

    #[test]
    fn test_state_is_persisted_on_every_mutation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.db");
        let open = || Library::new(DurableSlot::open_or_memory(&path, LIBRARY_KEY, LIBRARY_VERSION));

        let id = Uuid::new_v4();
        {
            let mut library = open();
            assert!(library.toggle_favorite(id));
            library.set_volume(0.25);
            library.create_playlist("Kept");
        }

        let mut reopened = open();
        assert!(!reopened.is_degraded());
        assert!(reopened.is_favorite(id));
        assert_eq!(reopened.volume(), 0.25);
        assert_eq!(reopened.state().playlists[0].name, "Kept");

        assert!(!reopened.toggle_favorite(id));
        assert!(!open().is_favorite(id));
    }

    #[test]
    fn test_playlist_edits_are_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.db");
        let open = || Library::new(DurableSlot::open_or_memory(&path, LIBRARY_KEY, LIBRARY_VERSION));

        let (a, b, c) = (track("a", "x", "y"), track("b", "x", "y"), track("c", "x", "y"));
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        let mix = {
            let mut library = open();
            let mix = library.create_playlist("Mix");
            for t in [a, b, c] {
                library.add_to_playlist(mix, t);
            }
            assert!(library.move_in_playlist(mix, 2, 0));
            assert!(library.remove_from_playlist(mix, a_id));

            assert!(!library.move_in_playlist(mix, 0, 5));
            assert!(!library.remove_from_playlist(mix, a_id));
            assert!(!library.remove_from_playlist(Uuid::new_v4(), b_id));
            mix
        };

        let reopened = open();
        let ids: Vec<Uuid> = reopened.playlist(mix).unwrap().tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![c_id, b_id]);
    }

    #[test]
    fn test_playlist_tracks_persist_detached() {
        let mut library = Library::in_memory();
        let mix = library.create_playlist("Mix");
        library.add_to_playlist(mix, Track::from_bytes(vec![1u8, 2]).with_title("local"));

        let json = serde_json::to_string(library.state()).unwrap();
        let restored: LibraryState = serde_json::from_str(&json).unwrap();
        assert_eq!(
            restored.playlists[0].tracks[0].source,
            crate::audio::TrackSource::Detached
        );
    }
}
