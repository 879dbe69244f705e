//! The audio-processing primitive the engine drives
//!
//! Nodes live inside the backend and are addressed by [`NodeId`]; the engine
//! never holds a node directly, so disposing the graph is just a matter of
//! handing every id back. The DSP behind each node kind is the backend's
//! business.

pub mod null;
#[cfg(feature = "audio")]
pub mod rodio;

pub use null::{BackendEvent, NullBackend, NullProbe};
#[cfg(feature = "audio")]
pub use self::rodio::RodioBackend;

use crate::error::BackendError;
use std::fmt;
use std::sync::Arc;

/// Arena handle for a node owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Which EQ band a gain applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "low" => Some(EqBand::Low),
            "mid" => Some(EqBand::Mid),
            "high" => Some(EqBand::High),
            _ => None,
        }
    }
}

/// Node construction requests, with initial parameters
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Player,
    Eq3 { low: f32, mid: f32, high: f32 },
    Compressor { threshold_db: f32, ratio: f32 },
    StereoWidener { width: f32 },
    CrossFade { fade: f32 },
    Analyser { size: usize },
}

impl NodeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeSpec::Player => "player",
            NodeSpec::Eq3 { .. } => "eq3",
            NodeSpec::Compressor { .. } => "compressor",
            NodeSpec::StereoWidener { .. } => "widener",
            NodeSpec::CrossFade { .. } => "crossfade",
            NodeSpec::Analyser { .. } => "analyser",
        }
    }
}

/// Parameter changes, applied immediately (no ramp)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    EqGain(EqBand, f32),
    Threshold(f32),
    Width(f32),
    /// Player gain in dB; `f32::NEG_INFINITY` mutes
    VolumeDb(f32),
}

/// Input side of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Node(NodeId),
    /// The A input of a crossfade node
    CrossFadeA(NodeId),
    Destination,
}

/// Pull-side view of the signal at an analyser node
pub trait SampleTap: Send + Sync {
    /// Fill `out` with the most recent mono samples, oldest first.
    /// Silence when nothing is playing.
    fn snapshot(&self, out: &mut [f32]);
}

impl fmt::Debug for dyn SampleTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SampleTap")
    }
}

/// The external audio context: node arena, monotonic clock, decoder and
/// the start/stop scheduling of the single player node.
pub trait AudioBackend {
    /// A decoded, ready-to-bind buffer
    type Buffer;

    /// Monotonic audio clock in seconds. Never pauses.
    fn now(&self) -> f64;

    fn create_node(&mut self, spec: &NodeSpec) -> Result<NodeId, BackendError>;

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError>;

    /// Release a node. Unknown ids are ignored.
    fn dispose_node(&mut self, node: NodeId);

    fn set_param(&mut self, node: NodeId, param: Param) -> Result<(), BackendError>;

    fn decode(&mut self, bytes: &[u8]) -> Result<Self::Buffer, BackendError>;

    fn buffer_duration(&self, buffer: &Self::Buffer) -> f64;

    /// Replace whatever buffer the player node holds.
    fn bind(&mut self, player: NodeId, buffer: Self::Buffer) -> Result<(), BackendError>;

    /// Start the player at `offset` seconds into its buffer.
    fn start(&mut self, player: NodeId, offset: f64) -> Result<(), BackendError>;

    /// Stop the player. Stopping a stopped player is fine.
    fn stop(&mut self, player: NodeId) -> Result<(), BackendError>;

    fn tap(&self, analyser: NodeId) -> Option<Arc<dyn SampleTap>>;
}

/// Converts a linear 0..=1 volume into the player gain in dB
pub fn volume_to_db(volume: f32) -> f32 {
    if volume <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * volume.min(1.0).log10()
    }
}

/// Inverse of [`volume_to_db`], for backends that take linear gain
pub fn db_to_gain(db: f32) -> f32 {
    if db == f32::NEG_INFINITY {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}
