// ToneDeck Library - the playback core behind the players
// Engine, queue and storage are separate so a UI can pick what it needs

pub mod audio;    // backends, effects graph, clock, loading
pub mod config;   // settings and defaults
pub mod engine;   // the one playback engine per player
pub mod error;    // error types per layer
pub mod history;  // what got played, skipped, finished
pub mod queue;    // play queue + library state
pub mod session;  // the driver loop tying it together
pub mod storage;  // durable key-value slots

// Export the stuff other crates actually use
pub use audio::{AudioBackend, MusicScanner, NullBackend, PlaybackState, PlayerEvent, Track, TrackMetadata};
pub use config::Config;
pub use engine::AudioEngine;
pub use queue::{Library, QueueEvent, QueueStore};
pub use session::{NowPlaying, Session, SessionCommand};
