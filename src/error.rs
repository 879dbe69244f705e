//! Error types for the playback engine
//!
//! Loads fail with [`LoadError`] and leave the previous playback alone,
//! commands issued against the wrong state come back as [`StateError`] and
//! do nothing, and storage trouble surfaces as [`ResourceError`] right at the
//! boundary where the caller drops to memory-only mode.

use thiserror::Error;
use uuid::Uuid;

use crate::audio::backend::NodeId;

/// Failures reported by an [`AudioBackend`](crate::audio::backend::AudioBackend)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("failed to create {kind} node: {reason}")]
    NodeCreation { kind: &'static str, reason: String },

    #[error("failed to connect node {from:?}: {reason}")]
    Connection { from: NodeId, reason: String },

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("node {node:?} does not accept {what}")]
    WrongNodeKind { node: NodeId, what: &'static str },

    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("audio output error: {0}")]
    Output(String),
}

/// Graph construction and lifecycle failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("audio graph has been disposed")]
    Disposed,

    #[error("graph was built for a mount that is gone")]
    Stale,
}

/// A track could not be turned into a playing source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("engine is not ready")]
    NotReady,

    #[error("track {track_id} has no in-memory handle or URL")]
    Unresolvable { track_id: Uuid },

    #[error("unsupported source url: {0}")]
    UnsupportedUrl(String),

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to decode track: {0}")]
    Decode(String),

    #[error("failed to bind source: {0}")]
    Bind(#[from] BackendError),
}

/// A command was issued against a state that cannot honour it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("engine is not ready")]
    NotReady,

    #[error("nothing is loaded")]
    NothingLoaded,

    #[error("a track is still loading")]
    LoadPending,

    #[error("playback is not running")]
    NotPlaying,

    #[error("invalid position: {0}")]
    InvalidPosition(f64),

    #[error("backend rejected the command: {0}")]
    Backend(#[from] BackendError),
}

/// Durable storage is unavailable or returned something unusable
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
