use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub metadata: TrackMetadata,
    #[serde(skip)]
    pub artwork: Option<Artwork>,
    pub source: TrackSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Cover art bytes; freed with the last track that references them
#[derive(Clone, PartialEq)]
pub struct Artwork {
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for Artwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artwork")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Where a track's audio comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PersistedSource", into = "PersistedSource")]
pub enum TrackSource {
    /// Audio held in memory (a picked file)
    Memory(BlobHandle),
    /// Fetched from an http(s) URL when loaded
    Remote(String),
    /// The in-memory audio did not survive persistence
    Detached,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum PersistedSource {
    Remote { url: String },
    Detached,
}

impl From<TrackSource> for PersistedSource {
    fn from(source: TrackSource) -> Self {
        match source {
            TrackSource::Remote(url) => PersistedSource::Remote { url },
            TrackSource::Memory(_) | TrackSource::Detached => PersistedSource::Detached,
        }
    }
}

impl From<PersistedSource> for TrackSource {
    fn from(source: PersistedSource) -> Self {
        match source {
            PersistedSource::Remote { url } => TrackSource::Remote(url),
            PersistedSource::Detached => TrackSource::Detached,
        }
    }
}

/// In-memory audio. Playback takes a [`PlayableRef`] lease on it.
#[derive(Clone)]
pub struct BlobHandle {
    bytes: Arc<[u8]>,
    leases: Arc<AtomicUsize>,
}

impl BlobHandle {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Take a transient playable reference; it is revoked when dropped
    pub fn lease(&self) -> PlayableRef {
        self.leases.fetch_add(1, Ordering::AcqRel);
        PlayableRef {
            bytes: self.bytes.clone(),
            leases: self.leases.clone(),
        }
    }

    /// Leases currently outstanding
    pub fn live_leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }
}

impl PartialEq for BlobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("len", &self.bytes.len())
            .field("leases", &self.live_leases())
            .finish()
    }
}

/// Transient reference to in-memory audio, held while a source is bound
pub struct PlayableRef {
    bytes: Arc<[u8]>,
    leases: Arc<AtomicUsize>,
}

impl PlayableRef {
    pub fn bytes(&self) -> Arc<[u8]> {
        self.bytes.clone()
    }
}

impl Drop for PlayableRef {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for PlayableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableRef").field("len", &self.bytes.len()).finish()
    }
}

impl Track {
    pub fn new(source: TrackSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata: TrackMetadata::default(),
            artwork: None,
            source,
        }
    }

    /// A track over audio already in memory
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(TrackSource::Memory(BlobHandle::new(bytes)))
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self::new(TrackSource::Remote(url.into()))
    }

    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn with_artwork(mut self, artwork: Artwork) -> Self {
        self.artwork = Some(artwork);
        self
    }

    pub fn display_title(&self) -> String {
        self.metadata
            .title
            .clone()
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn display_artist(&self) -> String {
        self.metadata
            .artist
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }

    pub fn display_album(&self) -> String {
        self.metadata
            .album
            .clone()
            .unwrap_or_else(|| "Unknown Album".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leases_are_revoked_on_drop() {
        let blob = BlobHandle::new(vec![1u8, 2, 3]);
        let first = blob.lease();
        let second = blob.lease();
        assert_eq!(blob.live_leases(), 2);
        assert_eq!(&*first.bytes(), &[1, 2, 3]);

        drop(first);
        drop(second);
        assert_eq!(blob.live_leases(), 0);
    }

    #[test]
    fn test_memory_source_persists_as_detached() {
        let track = Track::from_bytes(vec![0u8; 16]).with_title("Local");
        let json = serde_json::to_string(&track).unwrap();
        let restored: Track = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, track.id);
        assert_eq!(restored.display_title(), "Local");
        assert_eq!(restored.source, TrackSource::Detached);
    }

    #[test]
    fn test_remote_source_round_trips() {
        let track = Track::remote("https://example.org/song.ogg");
        let json = serde_json::to_string(&track).unwrap();
        assert!(json.contains("\"kind\":\"remote\""));
        let restored: Track = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.source, track.source);
    }

    #[test]
    fn test_display_fallbacks() {
        let track = Track::remote("https://example.org/a.mp3");
        assert_eq!(track.display_title(), "Unknown");
        assert_eq!(track.display_artist(), "Unknown Artist");
        assert_eq!(track.display_album(), "Unknown Album");
    }
}
