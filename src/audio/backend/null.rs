//! Headless backend
//!
//! Renders nothing, but keeps every node, parameter and scheduling call so
//! the engine can run without an output device. Time comes from a
//! [`ManualClock`]; buffers are raw little-endian `f32` mono PCM.

use super::{AudioBackend, Endpoint, NodeId, NodeSpec, Param, SampleTap};
use crate::audio::clock::ManualClock;
use crate::error::BackendError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the backend was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Created(NodeId, &'static str),
    Connected(NodeId, Endpoint),
    Disposed(NodeId),
    ParamSet(NodeId, Param),
    Bound { player: NodeId, duration: f64 },
    Started { player: NodeId, offset: f64 },
    Stopped(NodeId),
}

/// Decoded PCM held by a player node
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug)]
struct NullNode {
    spec: NodeSpec,
    volume_db: f32,
    buffer: Option<PcmBuffer>,
    /// (clock reading, buffer offset) of the running start
    running: Option<(f64, f64)>,
}

#[derive(Debug, Default)]
struct NullState {
    nodes: BTreeMap<NodeId, NullNode>,
    next_id: u32,
    events: Vec<BackendEvent>,
    fail_create: Option<&'static str>,
    fail_connect: bool,
    fail_stop: bool,
}

/// Inspection and fault-injection handle, usable after the backend moved
/// into an engine
#[derive(Debug, Clone)]
pub struct NullProbe {
    state: Arc<Mutex<NullState>>,
    clock: ManualClock,
}

impl NullProbe {
    fn lock(&self) -> MutexGuard<'_, NullState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn advance(&self, seconds: f64) {
        self.clock.advance(seconds);
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn live_nodes(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Current parameters of a node, as a spec
    pub fn spec(&self, node: NodeId) -> Option<NodeSpec> {
        self.lock().nodes.get(&node).map(|n| n.spec.clone())
    }

    pub fn volume_db(&self, node: NodeId) -> Option<f32> {
        self.lock().nodes.get(&node).map(|n| n.volume_db)
    }

    pub fn is_running(&self, node: NodeId) -> bool {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.running.is_some())
            .unwrap_or(false)
    }

    /// Make the next creation of `kind` fail
    pub fn fail_on_create(&self, kind: &'static str) {
        self.lock().fail_create = Some(kind);
    }

    /// Make the next connection fail
    pub fn fail_next_connect(&self) {
        self.lock().fail_connect = true;
    }

    pub fn fail_next_stop(&self) {
        self.lock().fail_stop = true;
    }
}

pub struct NullBackend {
    state: Arc<Mutex<NullState>>,
    clock: ManualClock,
    sample_rate: u32,
}

impl NullBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(NullState::default())),
            clock: ManualClock::new(),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn probe(&self) -> NullProbe {
        NullProbe {
            state: self.state.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Encode samples the way [`AudioBackend::decode`] expects them
    pub fn encode(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, NullState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(8_000)
    }
}

fn apply_param(spec: &mut NodeSpec, volume_db: &mut f32, param: Param) -> bool {
    match (spec, param) {
        (NodeSpec::Player, Param::VolumeDb(db)) => *volume_db = db,
        (NodeSpec::Eq3 { low, mid, high }, Param::EqGain(band, gain)) => match band {
            super::EqBand::Low => *low = gain,
            super::EqBand::Mid => *mid = gain,
            super::EqBand::High => *high = gain,
        },
        (NodeSpec::Compressor { threshold_db, .. }, Param::Threshold(db)) => *threshold_db = db,
        (NodeSpec::StereoWidener { width }, Param::Width(w)) => *width = w,
        _ => return false,
    }
    true
}

impl AudioBackend for NullBackend {
    type Buffer = PcmBuffer;

    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn create_node(&mut self, spec: &NodeSpec) -> Result<NodeId, BackendError> {
        let mut state = self.lock();
        if state.fail_create == Some(spec.kind()) {
            state.fail_create = None;
            return Err(BackendError::NodeCreation {
                kind: spec.kind(),
                reason: "injected failure".into(),
            });
        }

        let id = NodeId(state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id,
            NullNode {
                spec: spec.clone(),
                volume_db: 0.0,
                buffer: None,
                running: None,
            },
        );
        state.events.push(BackendEvent::Created(id, spec.kind()));
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_connect) {
            return Err(BackendError::Connection {
                from,
                reason: "injected failure".into(),
            });
        }
        if !state.nodes.contains_key(&from) {
            return Err(BackendError::UnknownNode(from));
        }
        match to {
            Endpoint::Destination => {}
            Endpoint::Node(target) => {
                if !state.nodes.contains_key(&target) {
                    return Err(BackendError::UnknownNode(target));
                }
            }
            Endpoint::CrossFadeA(target) => {
                match state.nodes.get(&target).map(|n| &n.spec) {
                    Some(NodeSpec::CrossFade { .. }) => {}
                    Some(_) => {
                        return Err(BackendError::WrongNodeKind {
                            node: target,
                            what: "crossfade inputs",
                        })
                    }
                    None => return Err(BackendError::UnknownNode(target)),
                }
            }
        }
        state.events.push(BackendEvent::Connected(from, to));
        Ok(())
    }

    fn dispose_node(&mut self, node: NodeId) {
        let mut state = self.lock();
        if state.nodes.remove(&node).is_some() {
            state.events.push(BackendEvent::Disposed(node));
        }
    }

    fn set_param(&mut self, node: NodeId, param: Param) -> Result<(), BackendError> {
        let mut state = self.lock();
        let entry = state
            .nodes
            .get_mut(&node)
            .ok_or(BackendError::UnknownNode(node))?;
        if !apply_param(&mut entry.spec, &mut entry.volume_db, param) {
            return Err(BackendError::WrongNodeKind {
                node,
                what: "this parameter",
            });
        }
        state.events.push(BackendEvent::ParamSet(node, param));
        Ok(())
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<PcmBuffer, BackendError> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(BackendError::Decode(format!(
                "expected f32 PCM, got {} bytes",
                bytes.len()
            )));
        }
        let samples: Arc<[f32]> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(PcmBuffer {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    fn buffer_duration(&self, buffer: &PcmBuffer) -> f64 {
        buffer.duration()
    }

    fn bind(&mut self, player: NodeId, buffer: PcmBuffer) -> Result<(), BackendError> {
        let mut state = self.lock();
        let entry = state
            .nodes
            .get_mut(&player)
            .ok_or(BackendError::UnknownNode(player))?;
        if entry.spec != NodeSpec::Player {
            return Err(BackendError::WrongNodeKind {
                node: player,
                what: "buffers",
            });
        }
        let duration = buffer.duration();
        entry.running = None;
        entry.buffer = Some(buffer);
        state.events.push(BackendEvent::Bound { player, duration });
        Ok(())
    }

    fn start(&mut self, player: NodeId, offset: f64) -> Result<(), BackendError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let entry = state
            .nodes
            .get_mut(&player)
            .ok_or(BackendError::UnknownNode(player))?;
        if entry.buffer.is_none() {
            return Err(BackendError::Output("no buffer bound".into()));
        }
        entry.running = Some((now, offset));
        state.events.push(BackendEvent::Started { player, offset });
        Ok(())
    }

    fn stop(&mut self, player: NodeId) -> Result<(), BackendError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_stop) {
            return Err(BackendError::Output("stop rejected".into()));
        }
        let entry = state
            .nodes
            .get_mut(&player)
            .ok_or(BackendError::UnknownNode(player))?;
        if entry.running.take().is_some() {
            state.events.push(BackendEvent::Stopped(player));
        }
        Ok(())
    }

    fn tap(&self, analyser: NodeId) -> Option<Arc<dyn SampleTap>> {
        let state = self.lock();
        match state.nodes.get(&analyser).map(|n| &n.spec) {
            Some(NodeSpec::Analyser { .. }) => Some(Arc::new(NullTap {
                state: self.state.clone(),
                clock: self.clock.clone(),
            })),
            _ => None,
        }
    }
}

/// Reads the running player's buffer at the clock's current position
struct NullTap {
    state: Arc<Mutex<NullState>>,
    clock: ManualClock,
}

impl SampleTap for NullTap {
    fn snapshot(&self, out: &mut [f32]) {
        out.fill(0.0);
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let playing = state.nodes.values().find_map(|node| {
            let (started, offset) = node.running?;
            Some((node.buffer.as_ref()?, started, offset))
        });
        let Some((buffer, started, offset)) = playing else {
            return;
        };

        let position = offset + (self.clock.now() - started).max(0.0);
        let end = ((position * buffer.sample_rate as f64) as usize).min(buffer.samples.len());
        let start = end.saturating_sub(out.len());
        let window = &buffer.samples[start..end];
        let pad = out.len() - window.len();
        out[pad..].copy_from_slice(window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        let mut backend = NullBackend::new(100);
        assert!(backend.decode(&[]).is_err());
        assert!(backend.decode(&[1, 2, 3]).is_err());

        let buffer = backend.decode(&NullBackend::encode(&[0.0; 250])).unwrap();
        assert_eq!(backend.buffer_duration(&buffer), 2.5);
    }

    #[test]
    fn test_crossfade_inputs_require_crossfade() {
        let mut backend = NullBackend::new(100);
        let eq = backend
            .create_node(&NodeSpec::Eq3 { low: 0.0, mid: 0.0, high: 0.0 })
            .unwrap();
        let player = backend.create_node(&NodeSpec::Player).unwrap();
        assert!(matches!(
            backend.connect(player, Endpoint::CrossFadeA(eq)),
            Err(BackendError::WrongNodeKind { .. })
        ));
    }

    #[test]
    fn test_tap_follows_the_clock() {
        let mut backend = NullBackend::new(10);
        let probe = backend.probe();
        let player = backend.create_node(&NodeSpec::Player).unwrap();
        let analyser = backend.create_node(&NodeSpec::Analyser { size: 4 }).unwrap();

        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let buffer = backend.decode(&NullBackend::encode(&samples)).unwrap();
        backend.bind(player, buffer).unwrap();
        backend.start(player, 1.0).unwrap();
        probe.advance(1.0);

        let tap = backend.tap(analyser).unwrap();
        let mut out = [0.0; 4];
        tap.snapshot(&mut out);
        assert_eq!(out, [16.0, 17.0, 18.0, 19.0]);

        backend.stop(player).unwrap();
        tap.snapshot(&mut out);
        assert_eq!(out, [0.0; 4]);
    }
}
