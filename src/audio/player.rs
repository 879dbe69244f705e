use super::backend::AudioBackend;
use super::clock::PlaybackClock;
use super::graph::AudioGraph;
use super::Track;
use crate::error::StateError;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Loading,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackStarted(Track),
    TrackPaused { position: f64 },
    TrackResumed { position: f64 },
    TrackSeeked { position: f64 },
    TrackEnded(Track),
    PositionChanged(f64),
    VolumeChanged(f32),
    LoadFailed(String),
    Disposed,
}

/// Outcome of one frame of position polling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Position(f64),
    Ended,
}

/// The per-frame polling task. Scheduled while playing, cancelled on
/// pause/stop/dispose; each tick reschedules itself until the track ends.
#[derive(Debug, Default)]
pub struct FrameTask {
    scheduled: bool,
    frames: u64,
}

impl FrameTask {
    pub fn schedule(&mut self) {
        self.scheduled = true;
    }

    pub fn cancel(&mut self) {
        self.scheduled = false;
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Frames run since the engine was created
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Play/pause/seek against the graph's player node, with the position kept
/// by an offset clock
#[derive(Debug)]
pub struct PlaybackController {
    clock: Option<PlaybackClock>,
    state: PlaybackState,
    current_time: f64,
    frame_task: FrameTask,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            clock: None,
            state: PlaybackState::Stopped,
            current_time: 0.0,
            frame_task: FrameTask::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Whether a buffer is bound and settled
    pub fn is_loaded(&self) -> bool {
        self.clock.is_some() && self.state != PlaybackState::Loading
    }

    pub fn duration(&self) -> f64 {
        self.clock.as_ref().map(PlaybackClock::duration).unwrap_or(0.0)
    }

    /// Last surfaced position (updated by ticks, pauses and seeks)
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Live position read straight off the clock
    pub fn position(&self, now: f64) -> f64 {
        match (&self.clock, self.state) {
            (Some(clock), PlaybackState::Playing) => clock.position(now),
            _ => self.current_time,
        }
    }

    pub fn frame_task(&self) -> &FrameTask {
        &self.frame_task
    }

    fn check_loaded(&self) -> Result<(), StateError> {
        match (self.state, &self.clock) {
            (PlaybackState::Loading, _) => Err(StateError::LoadPending),
            (_, None) => Err(StateError::NothingLoaded),
            _ => Ok(()),
        }
    }

    pub fn play<B: AudioBackend>(&mut self, graph: &mut AudioGraph<B>) -> Result<(), StateError> {
        let nodes = graph.nodes().ok_or(StateError::NotReady)?;
        self.check_loaded()?;
        if self.state == PlaybackState::Playing {
            return Ok(());
        }

        let Some(clock) = self.clock.as_mut() else {
            return Err(StateError::NothingLoaded);
        };
        if self.state == PlaybackState::Ended {
            clock.set_offset(0.0);
        }

        let offset = clock.offset();
        clock.start(graph.backend().now());
        if let Err(e) = graph.backend_mut().start(nodes.player, offset) {
            clock.set_offset(offset);
            return Err(e.into());
        }

        self.current_time = offset;
        self.state = PlaybackState::Playing;
        self.frame_task.schedule();
        debug!("playing from {:.3}s", offset);
        Ok(())
    }

    pub fn pause<B: AudioBackend>(&mut self, graph: &mut AudioGraph<B>) -> Result<(), StateError> {
        let nodes = graph.nodes().ok_or(StateError::NotReady)?;
        self.check_loaded()?;
        if self.state != PlaybackState::Playing {
            return Err(StateError::NotPlaying);
        }

        let Some(clock) = self.clock.as_mut() else {
            return Err(StateError::NothingLoaded);
        };
        // the source must be silent before the state says so
        graph.backend_mut().stop(nodes.player)?;
        let offset = clock.freeze(graph.backend().now());
        self.frame_task.cancel();
        self.state = PlaybackState::Paused;
        self.current_time = offset;
        debug!("paused at {:.3}s", offset);
        Ok(())
    }

    pub fn toggle<B: AudioBackend>(&mut self, graph: &mut AudioGraph<B>) -> Result<(), StateError> {
        if self.state == PlaybackState::Playing {
            self.pause(graph)
        } else {
            self.play(graph)
        }
    }

    /// Jump to `seconds`, clamped to the track. Keeps playing if it was.
    pub fn seek<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        seconds: f64,
    ) -> Result<f64, StateError> {
        let nodes = graph.nodes().ok_or(StateError::NotReady)?;
        self.check_loaded()?;
        if !seconds.is_finite() {
            return Err(StateError::InvalidPosition(seconds));
        }
        let Some(clock) = self.clock.as_mut() else {
            return Err(StateError::NothingLoaded);
        };

        if self.state == PlaybackState::Playing {
            graph.backend_mut().stop(nodes.player)?;
            let target = clock.set_offset(seconds);
            clock.start(graph.backend().now());
            if let Err(e) = graph.backend_mut().start(nodes.player, target) {
                clock.set_offset(target);
                self.current_time = target;
                self.state = PlaybackState::Paused;
                self.frame_task.cancel();
                return Err(e.into());
            }
            self.current_time = target;
            Ok(target)
        } else {
            let target = clock.set_offset(seconds);
            self.current_time = target;
            self.state = PlaybackState::Paused;
            Ok(target)
        }
    }

    /// One frame of position polling. `None` when the task is not scheduled.
    pub fn tick<B: AudioBackend>(&mut self, graph: &mut AudioGraph<B>) -> Option<Tick> {
        if !self.frame_task.is_scheduled() || self.state != PlaybackState::Playing {
            self.frame_task.cancel();
            return None;
        }
        let nodes = graph.nodes()?;
        let clock = self.clock.as_mut()?;
        self.frame_task.frames += 1;

        let now = graph.backend().now();
        let position = clock.position(now);
        if position < clock.duration() {
            self.current_time = position;
            return Some(Tick::Position(position));
        }

        let end = clock.duration();
        clock.set_offset(end);
        self.current_time = end;
        self.state = PlaybackState::Ended;
        self.frame_task.cancel();
        if let Err(e) = graph.backend_mut().stop(nodes.player) {
            debug!("stop at end of track failed: {}", e);
        }
        Some(Tick::Ended)
    }

    /// Stop whatever is bound ahead of a rebind, keeping its position
    pub fn begin_loading<B: AudioBackend>(&mut self, graph: &mut AudioGraph<B>) {
        if self.state == PlaybackState::Playing {
            let now = graph.backend().now();
            if let Some(clock) = self.clock.as_mut() {
                self.current_time = clock.freeze(now);
            }
        }
        if let Some(nodes) = graph.nodes() {
            if let Err(e) = graph.backend_mut().stop(nodes.player) {
                debug!("stop before rebind failed: {}", e);
            }
        }
        self.frame_task.cancel();
        self.state = PlaybackState::Loading;
    }

    /// A load fell through; fall back to whatever was bound before
    pub fn abort_loading(&mut self) {
        if self.state != PlaybackState::Loading {
            return;
        }
        self.state = match &self.clock {
            Some(clock) => {
                self.current_time = clock.offset();
                PlaybackState::Paused
            }
            None => PlaybackState::Stopped,
        };
    }

    /// A new buffer of `duration` seconds is bound: reset to 0 and play it
    pub fn start_new<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        duration: f64,
    ) -> Result<(), StateError> {
        self.clock = Some(PlaybackClock::new(duration));
        self.current_time = 0.0;
        self.state = PlaybackState::Paused;
        self.play(graph)
    }

    /// Forget the bound buffer entirely (dispose)
    pub fn reset(&mut self) {
        self.frame_task.cancel();
        self.clock = None;
        self.state = PlaybackState::Stopped;
        self.current_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{BackendEvent, NullBackend, NullProbe};
    use crate::config::EngineConfig;

    fn loaded(duration: f64) -> (AudioGraph<NullBackend>, PlaybackController, NullProbe) {
        let mut backend = NullBackend::new(100);
        let probe = backend.probe();
        let buffer = backend
            .decode(&NullBackend::encode(&vec![0.0; (duration * 100.0) as usize]))
            .unwrap();
        let mut graph = AudioGraph::new(backend, EngineConfig::default());
        graph.initialize().unwrap();
        let player = graph.nodes().unwrap().player;
        graph.backend_mut().bind(player, buffer).unwrap();

        let mut controller = PlaybackController::new();
        controller.start_new(&mut graph, duration).unwrap();
        (graph, controller, probe)
    }

    #[test]
    fn test_nothing_loaded_is_reported() {
        let mut graph = AudioGraph::new(NullBackend::new(100), EngineConfig::default());
        let mut controller = PlaybackController::new();
        assert_eq!(controller.play(&mut graph), Err(StateError::NotReady));

        graph.initialize().unwrap();
        assert_eq!(controller.play(&mut graph), Err(StateError::NothingLoaded));
        assert_eq!(controller.seek(&mut graph, 3.0), Err(StateError::NothingLoaded));
        assert_eq!(controller.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_pause_resume_accumulates_offset() {
        let (mut graph, mut c, probe) = loaded(60.0);
        probe.advance(4.0);
        c.pause(&mut graph).unwrap();
        assert_eq!(c.current_time(), 4.0);

        probe.advance(30.0);
        c.play(&mut graph).unwrap();
        probe.advance(2.5);
        assert_eq!(c.tick(&mut graph), Some(Tick::Position(6.5)));

        c.pause(&mut graph).unwrap();
        assert_eq!(c.current_time(), 6.5);
        assert!(probe
            .events()
            .contains(&BackendEvent::Started { player: graph.nodes().unwrap().player, offset: 4.0 }));
    }

    #[test]
    fn test_failed_stop_keeps_playing() {
        let (mut graph, mut c, probe) = loaded(60.0);
        let player = graph.nodes().unwrap().player;
        probe.advance(5.0);
        probe.fail_next_stop();

        assert!(matches!(c.pause(&mut graph), Err(StateError::Backend(_))));
        assert_eq!(c.state(), PlaybackState::Playing);
        assert!(c.frame_task().is_scheduled());
        assert!(probe.is_running(player));

        probe.advance(1.0);
        c.pause(&mut graph).unwrap();
        assert_eq!(c.current_time(), 6.0);
        assert!(!probe.is_running(player));
    }

    #[test]
    fn test_pause_twice_keeps_position() {
        let (mut graph, mut c, probe) = loaded(60.0);
        probe.advance(3.0);
        c.pause(&mut graph).unwrap();
        probe.advance(5.0);
        assert_eq!(c.pause(&mut graph), Err(StateError::NotPlaying));
        assert_eq!(c.current_time(), 3.0);
        assert_eq!(c.position(probe.clock().now()), 3.0);
    }

    #[test]
    fn test_seek_zero_reads_zero() {
        let (mut graph, mut c, probe) = loaded(60.0);
        probe.advance(12.0);
        assert_eq!(c.seek(&mut graph, 0.0), Ok(0.0));
        assert_eq!(c.current_time(), 0.0);
        assert!(c.is_playing());

        c.pause(&mut graph).unwrap();
        probe.advance(1.0);
        assert_eq!(c.seek(&mut graph, 0.0), Ok(0.0));
        assert_eq!(c.current_time(), 0.0);
        assert!(!c.is_playing());
    }

    #[test]
    fn test_seek_while_paused_does_not_start() {
        let (mut graph, mut c, probe) = loaded(60.0);
        c.pause(&mut graph).unwrap();
        probe.clear_events();

        assert_eq!(c.seek(&mut graph, 100.0), Ok(60.0));
        assert_eq!(c.seek(&mut graph, -4.0), Ok(0.0));
        assert!(matches!(
            c.seek(&mut graph, f64::NAN),
            Err(StateError::InvalidPosition(_))
        ));
        assert!(!probe.events().iter().any(|e| matches!(e, BackendEvent::Started { .. })));
        assert_eq!(c.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_track_ends_at_duration() {
        let (mut graph, mut c, probe) = loaded(10.0);
        probe.advance(10.0);
        assert_eq!(c.tick(&mut graph), Some(Tick::Ended));
        assert!(!c.is_playing());
        assert_eq!(c.state(), PlaybackState::Ended);
        assert_eq!(c.current_time(), 10.0);
        assert!(!c.frame_task().is_scheduled());
        assert!(!probe.is_running(graph.nodes().unwrap().player));

        // the cancelled task does nothing further
        assert_eq!(c.tick(&mut graph), None);

        // playing again starts over
        c.play(&mut graph).unwrap();
        assert_eq!(c.current_time(), 0.0);
    }

    #[test]
    fn test_commands_rejected_while_loading() {
        let (mut graph, mut c, probe) = loaded(30.0);
        probe.advance(5.0);
        c.begin_loading(&mut graph);
        assert_eq!(c.play(&mut graph), Err(StateError::LoadPending));
        assert_eq!(c.seek(&mut graph, 1.0), Err(StateError::LoadPending));
        assert!(!probe.is_running(graph.nodes().unwrap().player));

        c.abort_loading();
        assert_eq!(c.state(), PlaybackState::Paused);
        assert_eq!(c.current_time(), 5.0);
    }
}
