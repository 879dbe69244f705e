pub mod analyser;
pub mod backend;
pub mod clock;
pub mod effects;
pub mod graph;
pub mod loader;
pub mod player;
pub mod scanner;
pub mod track;

pub use analyser::Analyser;
pub use backend::{AudioBackend, EqBand, NullBackend};
pub use effects::{EffectSettings, EffectsController};
pub use graph::AudioGraph;
pub use loader::{LoadOutcome, LoadTicket, PendingLoad, SourceFetcher};
pub use player::{PlaybackController, PlaybackState, PlayerEvent, Tick};
pub use scanner::MusicScanner;
pub use track::{Artwork, BlobHandle, PlayableRef, Track, TrackMetadata, TrackSource};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Mp4,
    Wav,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp3" => AudioFormat::Mp3,
            "flac" => AudioFormat::Flac,
            "ogg" | "oga" => AudioFormat::Ogg,
            "mp4" | "m4a" | "aac" => AudioFormat::Mp4,
            "wav" => AudioFormat::Wav,
            _ => AudioFormat::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, AudioFormat::Unknown)
    }
}
