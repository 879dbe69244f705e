//! rodio output backend
//!
//! Decodes whole tracks up front into interleaved `f32` (the way a browser
//! audio buffer works) so starting at an offset is a plain index jump and
//! the buffer duration is exact. Only the player node makes sound here; the
//! EQ, compressor, widener and crossfade nodes hold their parameters for
//! whoever renders them.

use super::{db_to_gain, AudioBackend, Endpoint, NodeId, NodeSpec, Param, SampleTap};
use crate::error::BackendError;
use ::rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fully decoded interleaved audio
#[derive(Debug)]
pub struct DecodedAudio {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl DecodedAudio {
    fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Where the audio thread currently is in the bound buffer
#[derive(Debug, Default)]
struct Playhead {
    audio: Mutex<Option<Arc<DecodedAudio>>>,
    cursor: AtomicUsize,
    running: AtomicBool,
}

impl SampleTap for Playhead {
    fn snapshot(&self, out: &mut [f32]) {
        out.fill(0.0);
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let guard = self.audio.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(audio) = guard.as_ref() else {
            return;
        };

        // Mix down to mono, newest frame last
        let channels = audio.channels.max(1) as usize;
        let end_frame = self.cursor.load(Ordering::Relaxed) / channels;
        let start_frame = end_frame.saturating_sub(out.len());
        let pad = out.len() - (end_frame - start_frame);
        for (slot, frame) in out[pad..].iter_mut().zip(start_frame..end_frame) {
            let base = frame * channels;
            let sum: f32 = audio.samples[base..base + channels].iter().sum();
            *slot = sum / channels as f32;
        }
    }
}

/// Plays a decoded buffer from a sample index, publishing its progress
struct BufferSource {
    audio: Arc<DecodedAudio>,
    position: usize,
    playhead: Arc<Playhead>,
}

impl Iterator for BufferSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = *self.audio.samples.get(self.position)?;
        self.position += 1;
        self.playhead.cursor.store(self.position, Ordering::Relaxed);
        Some(sample)
    }
}

impl Source for BufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.audio.samples.len().saturating_sub(self.position))
    }

    fn channels(&self) -> u16 {
        self.audio.channels
    }

    fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.audio.duration()))
    }
}

enum RodioNode {
    Player {
        audio: Option<Arc<DecodedAudio>>,
        sink: Option<Sink>,
        gain: f32,
    },
    Effect(NodeSpec),
    Analyser,
}

pub struct RodioBackend {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    started_at: Instant,
    nodes: HashMap<NodeId, RodioNode>,
    next_id: u32,
    playhead: Arc<Playhead>,
}

impl RodioBackend {
    /// Open the default output device
    pub fn new() -> Result<Self, BackendError> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| BackendError::Output(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            stream_handle,
            started_at: Instant::now(),
            nodes: HashMap::new(),
            next_id: 0,
            playhead: Arc::new(Playhead::default()),
        })
    }

    fn player_mut(
        &mut self,
        node: NodeId,
    ) -> Result<(&mut Option<Arc<DecodedAudio>>, &mut Option<Sink>, &mut f32), BackendError> {
        match self.nodes.get_mut(&node) {
            Some(RodioNode::Player { audio, sink, gain }) => Ok((audio, sink, gain)),
            Some(_) => Err(BackendError::WrongNodeKind {
                node,
                what: "playback commands",
            }),
            None => Err(BackendError::UnknownNode(node)),
        }
    }
}

impl AudioBackend for RodioBackend {
    type Buffer = Arc<DecodedAudio>;

    fn now(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    fn create_node(&mut self, spec: &NodeSpec) -> Result<NodeId, BackendError> {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = match spec {
            NodeSpec::Player => RodioNode::Player {
                audio: None,
                sink: None,
                gain: 1.0,
            },
            NodeSpec::Analyser { .. } => RodioNode::Analyser,
            other => RodioNode::Effect(other.clone()),
        };
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError> {
        if !self.nodes.contains_key(&from) {
            return Err(BackendError::UnknownNode(from));
        }
        match to {
            Endpoint::Destination => Ok(()),
            Endpoint::Node(target) | Endpoint::CrossFadeA(target) => {
                if self.nodes.contains_key(&target) {
                    Ok(())
                } else {
                    Err(BackendError::UnknownNode(target))
                }
            }
        }
    }

    fn dispose_node(&mut self, node: NodeId) {
        if let Some(RodioNode::Player { sink: Some(sink), .. }) = self.nodes.remove(&node) {
            sink.stop();
            self.playhead.running.store(false, Ordering::Release);
        }
    }

    fn set_param(&mut self, node: NodeId, param: Param) -> Result<(), BackendError> {
        match (self.nodes.get_mut(&node), param) {
            (Some(RodioNode::Player { sink, gain, .. }), Param::VolumeDb(db)) => {
                *gain = db_to_gain(db);
                if let Some(sink) = sink {
                    sink.set_volume(*gain);
                }
                Ok(())
            }
            (Some(RodioNode::Effect(spec)), param) => {
                debug!("{} parameter {:?}", spec.kind(), param);
                Ok(())
            }
            (Some(_), _) => Err(BackendError::WrongNodeKind {
                node,
                what: "this parameter",
            }),
            (None, _) => Err(BackendError::UnknownNode(node)),
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<Arc<DecodedAudio>, BackendError> {
        let decoder = Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
        if samples.is_empty() {
            return Err(BackendError::Decode("no audio frames".into()));
        }

        Ok(Arc::new(DecodedAudio {
            samples,
            channels,
            sample_rate,
        }))
    }

    fn buffer_duration(&self, buffer: &Arc<DecodedAudio>) -> f64 {
        buffer.duration()
    }

    fn bind(&mut self, player: NodeId, buffer: Arc<DecodedAudio>) -> Result<(), BackendError> {
        let playhead = self.playhead.clone();
        let (audio, sink, _) = self.player_mut(player)?;
        if let Some(old) = sink.take() {
            old.stop();
        }
        playhead.running.store(false, Ordering::Release);
        playhead.cursor.store(0, Ordering::Relaxed);
        *playhead.audio.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(buffer.clone());
        *audio = Some(buffer);
        Ok(())
    }

    fn start(&mut self, player: NodeId, offset: f64) -> Result<(), BackendError> {
        let playhead = self.playhead.clone();
        let stream_handle = self.stream_handle.clone();
        let (audio, sink, gain) = self.player_mut(player)?;
        let audio = audio
            .clone()
            .ok_or_else(|| BackendError::Output("no buffer bound".into()))?;

        if let Some(old) = sink.take() {
            old.stop();
        }

        let channels = audio.channels.max(1) as usize;
        let frame = (offset.max(0.0) * audio.sample_rate as f64) as usize;
        let position = (frame * channels).min(audio.samples.len());
        playhead.cursor.store(position, Ordering::Relaxed);

        let new_sink =
            Sink::try_new(&stream_handle).map_err(|e| BackendError::Output(e.to_string()))?;
        new_sink.set_volume(*gain);
        new_sink.append(BufferSource {
            audio,
            position,
            playhead: playhead.clone(),
        });
        new_sink.play();
        *sink = Some(new_sink);
        playhead.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self, player: NodeId) -> Result<(), BackendError> {
        let playhead = self.playhead.clone();
        let (_, sink, _) = self.player_mut(player)?;
        if let Some(sink) = sink.take() {
            sink.stop();
        }
        playhead.running.store(false, Ordering::Release);
        Ok(())
    }

    fn tap(&self, analyser: NodeId) -> Option<Arc<dyn SampleTap>> {
        match self.nodes.get(&analyser) {
            Some(RodioNode::Analyser) => Some(self.playhead.clone() as Arc<dyn SampleTap>),
            _ => {
                warn!("tap requested on non-analyser node {:?}", analyser);
                None
            }
        }
    }
}
