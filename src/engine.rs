//! The playback engine
//!
//! [`AudioEngine`] ties the processing graph, the effect settings, the
//! position clock and the loader together behind one owner. Everything here
//! is synchronous except the fetch step of a load, which is handed back to
//! the caller as a [`PendingLoad`] so the engine is never borrowed across an
//! await.

use crate::audio::backend::{AudioBackend, EqBand};
use crate::audio::graph::PendingGraph;
use crate::audio::loader::{self, OfflineFetcher};
use crate::audio::{
    Analyser, AudioGraph, EffectSettings, EffectsController, LoadOutcome, LoadTicket, PendingLoad,
    PlayableRef, PlaybackController, PlaybackState, PlayerEvent, SourceFetcher, Tick, Track,
};
use crate::config::EngineConfig;
use crate::error::{BackendError, GraphError, LoadError, StateError};
use crate::history::{MemoryHistory, PlayHistory, PlayOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A load that has been started but not finished
struct InFlight {
    ticket: LoadTicket,
    track: Track,
    lease: Option<PlayableRef>,
}

/// The track whose buffer the player node holds
struct Binding {
    track: Track,
    // revoked when the binding is replaced or dropped
    _lease: Option<PlayableRef>,
}

pub struct AudioEngine<B: AudioBackend> {
    graph: AudioGraph<B>,
    effects: EffectsController,
    controller: PlaybackController,
    fetcher: Box<dyn SourceFetcher>,
    history: Box<dyn PlayHistory>,
    generation: u64,
    in_flight: Option<InFlight>,
    bound: Option<Binding>,
    events: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

impl<B: AudioBackend> AudioEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            effects: EffectsController::new(&config),
            graph: AudioGraph::new(backend, config),
            controller: PlaybackController::new(),
            fetcher: Box::new(OfflineFetcher),
            history: Box::new(MemoryHistory::new()),
            generation: 0,
            in_flight: None,
            bound: None,
            events: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_history(mut self, history: Box<dyn PlayHistory>) -> Self {
        self.history = history;
        self
    }

    /// Player events go to `tx` from now on
    pub fn set_event_sender(&mut self, tx: mpsc::UnboundedSender<PlayerEvent>) {
        self.events = Some(tx);
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn backend(&self) -> &B {
        self.graph.backend()
    }

    pub fn history(&self) -> &dyn PlayHistory {
        self.history.as_ref()
    }

    // --- lifecycle ---

    /// Build and attach the graph, then apply the stored effect settings.
    /// Returns `false` when a graph was already attached.
    pub fn initialize(&mut self) -> Result<bool, GraphError> {
        if self.graph.is_ready() {
            return Ok(false);
        }
        let pending = self.graph.begin_initialize()?;
        self.complete_initialize(pending)
    }

    pub fn begin_initialize(&mut self) -> Result<PendingGraph, GraphError> {
        self.graph.begin_initialize()
    }

    pub fn complete_initialize(&mut self, pending: PendingGraph) -> Result<bool, GraphError> {
        let attached = self.graph.complete_initialize(pending)?;
        if attached {
            self.effects.apply_all(&mut self.graph)?;
        }
        Ok(attached)
    }

    /// Stop playback and release the graph. Loads still in flight are
    /// discarded when they finish. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        let was_live = self.graph.is_mounted() || self.graph.is_ready();
        if self.bound.is_some() {
            let listened = self.controller.position(self.graph.backend().now());
            self.history.finish_play(listened, PlayOutcome::Skipped);
        }
        self.in_flight = None;
        self.controller.reset();
        self.graph.dispose();
        self.bound = None;
        if was_live {
            self.emit(PlayerEvent::Disposed);
        }
    }

    // --- state ---

    pub fn is_ready(&self) -> bool {
        self.graph.is_ready()
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    /// Seconds in the bound buffer, 0 when nothing is bound
    pub fn duration(&self) -> f64 {
        self.controller.duration()
    }

    /// Position as of the last tick, pause or seek
    pub fn current_time(&self) -> f64 {
        self.controller.current_time()
    }

    /// Position read off the clock right now
    pub fn position(&self) -> f64 {
        self.controller.position(self.graph.backend().now())
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.bound.as_ref().map(|b| &b.track)
    }

    pub fn loading_track(&self) -> Option<&Track> {
        self.in_flight.as_ref().map(|f| &f.track)
    }

    pub fn frame_scheduled(&self) -> bool {
        self.controller.frame_task().is_scheduled()
    }

    pub fn frame_interval(&self) -> Duration {
        let rate = self.graph.config().frame_rate.max(1);
        Duration::from_secs_f64(1.0 / f64::from(rate))
    }

    // --- loading ---

    fn load_failed(&mut self, err: LoadError) -> LoadError {
        warn!("load failed: {}", err);
        self.emit(PlayerEvent::LoadFailed(err.to_string()));
        err
    }

    /// Start loading `track`. The source is resolved before anything else
    /// happens, so an unusable track leaves the current playback as it was.
    pub fn begin_load(&mut self, track: Track) -> Result<PendingLoad, LoadError> {
        if !self.graph.is_ready() {
            return Err(self.load_failed(LoadError::NotReady));
        }
        let resolved = match loader::resolve(&track) {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.load_failed(e)),
        };
        let (lease, fetch) = resolved.into_fetch(self.fetcher.as_ref());

        self.controller.begin_loading(&mut self.graph);
        self.generation += 1;
        let ticket = LoadTicket {
            epoch: self.graph.epoch(),
            generation: self.generation,
        };
        info!("loading '{}'", track.display_title());
        self.in_flight = Some(InFlight {
            ticket,
            track,
            lease,
        });

        Ok(PendingLoad { ticket, fetch })
    }

    /// Hand back the fetched bytes for `ticket`: decode, bind and play.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        bytes: Result<Arc<[u8]>, LoadError>,
    ) -> Result<LoadOutcome, LoadError> {
        if ticket.epoch != self.graph.epoch() || !self.graph.is_ready() {
            debug!("discarding load {} from a previous mount", ticket.generation);
            return Ok(LoadOutcome::Discarded);
        }
        let in_flight = match self.in_flight.take() {
            Some(f) if f.ticket == ticket => f,
            other => {
                self.in_flight = other;
                debug!("discarding superseded load {}", ticket.generation);
                return Ok(LoadOutcome::Superseded);
            }
        };

        match self.bind(bytes) {
            Ok(duration) => {
                let listened = self.controller.current_time();
                self.history.finish_play(listened, PlayOutcome::Skipped);

                let InFlight { track, lease, .. } = in_flight;
                self.bound = Some(Binding {
                    track: track.clone(),
                    _lease: lease,
                });
                if let Err(e) = self.controller.start_new(&mut self.graph, duration) {
                    warn!("bound '{}' but could not start it: {}", track.display_title(), e);
                }

                self.history.record_play(&track);
                info!("playing '{}' ({:.1}s)", track.display_title(), duration);
                self.emit(PlayerEvent::TrackStarted(track));
                Ok(LoadOutcome::Started { duration })
            }
            Err(e) => {
                self.controller.abort_loading();
                Err(self.load_failed(e))
            }
        }
    }

    fn bind(&mut self, bytes: Result<Arc<[u8]>, LoadError>) -> Result<f64, LoadError> {
        let bytes = bytes?;
        let nodes = self.graph.nodes().ok_or(LoadError::NotReady)?;
        let buffer = self
            .graph
            .backend_mut()
            .decode(&bytes)
            .map_err(|e| match e {
                BackendError::Decode(reason) => LoadError::Decode(reason),
                other => LoadError::Decode(other.to_string()),
            })?;
        let duration = self.graph.backend().buffer_duration(&buffer);
        self.graph.backend_mut().bind(nodes.player, buffer)?;
        Ok(duration)
    }

    /// Give up on the load in flight, if any
    pub fn cancel_load(&mut self) {
        if self.in_flight.take().is_some() {
            self.generation += 1;
            self.controller.abort_loading();
            debug!("load cancelled");
        }
    }

    /// Forget the bound track: stop it, close its play and release its
    /// lease. The graph stays up; only a new load makes `play` valid again.
    pub fn unload(&mut self) {
        self.cancel_load();
        let Some(binding) = self.bound.take() else {
            return;
        };
        let listened = self.controller.position(self.graph.backend().now());
        self.history.finish_play(listened, PlayOutcome::Skipped);
        if let Some(nodes) = self.graph.nodes() {
            if let Err(e) = self.graph.backend_mut().stop(nodes.player) {
                warn!("stop while unloading failed: {}", e);
            }
        }
        let was_playing = self.controller.is_playing();
        self.controller.reset();
        info!("unloaded '{}'", binding.track.display_title());
        if was_playing {
            self.emit(PlayerEvent::TrackPaused { position: listened });
        }
    }

    /// Begin, fetch and finish in one go
    pub async fn load_track(&mut self, track: Track) -> Result<LoadOutcome, LoadError> {
        let pending = self.begin_load(track)?;
        let (ticket, bytes) = pending.wait().await;
        self.finish_load(ticket, bytes)
    }

    // --- transport ---

    pub fn play(&mut self) -> Result<(), StateError> {
        let was_playing = self.controller.is_playing();
        self.controller.play(&mut self.graph)?;
        if !was_playing {
            self.emit(PlayerEvent::TrackResumed {
                position: self.controller.current_time(),
            });
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), StateError> {
        self.controller.pause(&mut self.graph)?;
        self.emit(PlayerEvent::TrackPaused {
            position: self.controller.current_time(),
        });
        Ok(())
    }

    pub fn toggle_playback(&mut self) -> Result<(), StateError> {
        if self.controller.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Returns the position actually sought to
    pub fn seek(&mut self, seconds: f64) -> Result<f64, StateError> {
        let position = self.controller.seek(&mut self.graph, seconds)?;
        debug!("seek to {:.3}s", position);
        self.emit(PlayerEvent::TrackSeeked { position });
        Ok(position)
    }

    /// One frame of position polling. Call at [`frame_interval`](Self::frame_interval)
    /// while [`frame_scheduled`](Self::frame_scheduled) holds.
    pub fn tick(&mut self) -> Option<Tick> {
        let tick = self.controller.tick(&mut self.graph)?;
        match tick {
            Tick::Position(position) => self.emit(PlayerEvent::PositionChanged(position)),
            Tick::Ended => {
                let duration = self.controller.duration();
                self.history.finish_play(duration, PlayOutcome::Completed);
                if let Some(binding) = &self.bound {
                    info!("finished '{}'", binding.track.display_title());
                    self.emit(PlayerEvent::TrackEnded(binding.track.clone()));
                }
            }
        }
        Some(tick)
    }

    // --- effects ---

    pub fn effect_settings(&self) -> &EffectSettings {
        self.effects.settings()
    }

    pub fn set_eq_band(&mut self, band: EqBand, gain_db: f32) -> Result<(), GraphError> {
        self.effects.set_eq_band(&mut self.graph, band, gain_db)
    }

    pub fn toggle_compressor(&mut self, active: bool) -> Result<(), GraphError> {
        self.effects.toggle_compressor(&mut self.graph, active)
    }

    pub fn toggle_3d(&mut self, active: bool) -> Result<(), GraphError> {
        self.effects.toggle_3d(&mut self.graph, active)
    }

    pub fn set_stereo_width(&mut self, width: f32) -> Result<(), GraphError> {
        self.effects.set_stereo_width(&mut self.graph, width)
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<(), GraphError> {
        self.effects.set_volume(&mut self.graph, volume)?;
        self.emit(PlayerEvent::VolumeChanged(self.effects.settings().volume));
        Ok(())
    }

    /// Spectrum handle over the analyser node; `None` before initialize
    pub fn get_analyser(&self) -> Option<Analyser> {
        let nodes = self.graph.nodes()?;
        let tap = self.graph.backend().tap(nodes.analyser)?;
        Some(Analyser::new(self.graph.config().analyser_size, tap))
    }
}

impl<B: AudioBackend> Drop for AudioEngine<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{BackendEvent, NullBackend, NullProbe};
    use crate::audio::TrackSource;

    fn engine() -> (AudioEngine<NullBackend>, NullProbe) {
        let backend = NullBackend::new(100);
        let probe = backend.probe();
        let mut engine = AudioEngine::new(backend, EngineConfig::default());
        engine.initialize().unwrap();
        (engine, probe)
    }

    fn pcm_track(seconds: f64, title: &str) -> Track {
        let samples = vec![0.25f32; (seconds * 100.0) as usize];
        Track::from_bytes(NullBackend::encode(&samples)).with_title(title)
    }

    #[tokio::test]
    async fn test_load_binds_and_plays() {
        let (mut engine, probe) = engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);

        let outcome = engine.load_track(pcm_track(12.0, "a")).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Started { duration: 12.0 });
        assert!(engine.is_playing());
        assert_eq!(engine.duration(), 12.0);
        assert!(probe.is_running(engine.graph.nodes().unwrap().player));
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::TrackStarted(t)) if t.display_title() == "a"));
        assert_eq!(engine.history().recent(1)[0].title, "a");
    }

    #[tokio::test]
    async fn test_not_ready_and_unresolvable() {
        let mut engine = AudioEngine::new(NullBackend::default(), EngineConfig::default());
        assert!(matches!(
            engine.begin_load(pcm_track(1.0, "x")),
            Err(LoadError::NotReady)
        ));

        engine.initialize().unwrap();
        engine.load_track(pcm_track(5.0, "a")).await.unwrap();
        let detached = Track::new(TrackSource::Detached);
        assert!(matches!(
            engine.begin_load(detached),
            Err(LoadError::Unresolvable { .. })
        ));
        // playback untouched
        assert!(engine.is_playing());
        assert_eq!(engine.current_track().unwrap().display_title(), "a");
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_previous_binding() {
        let (mut engine, probe) = engine();
        engine.load_track(pcm_track(20.0, "a")).await.unwrap();
        probe.advance(4.0);

        let garbage = Track::from_bytes(vec![1u8, 2, 3]).with_title("bad");
        let err = engine.load_track(garbage).await.unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));

        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_eq!(engine.current_time(), 4.0);
        assert_eq!(engine.duration(), 20.0);
        assert_eq!(engine.current_track().unwrap().display_title(), "a");
        engine.play().unwrap();
        assert!(engine.is_playing());
    }

    #[tokio::test]
    async fn test_superseded_and_disposed_loads_are_dropped() {
        let (mut engine, _probe) = engine();
        let first = engine.begin_load(pcm_track(3.0, "first")).unwrap();
        let second = engine.begin_load(pcm_track(4.0, "second")).unwrap();

        let (ticket, bytes) = first.wait().await;
        assert_eq!(engine.finish_load(ticket, bytes), Ok(LoadOutcome::Superseded));
        let (ticket, bytes) = second.wait().await;
        assert_eq!(
            engine.finish_load(ticket, bytes),
            Ok(LoadOutcome::Started { duration: 4.0 })
        );

        let late = engine.begin_load(pcm_track(5.0, "late")).unwrap();
        engine.dispose();
        engine.initialize().unwrap();
        let (ticket, bytes) = late.wait().await;
        assert_eq!(engine.finish_load(ticket, bytes), Ok(LoadOutcome::Discarded));
        assert!(engine.current_track().is_none());
    }

    #[tokio::test]
    async fn test_end_of_track_emits_ended() {
        let (mut engine, probe) = engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.load_track(pcm_track(10.0, "a")).await.unwrap();
        engine.set_event_sender(tx);

        probe.advance(9.5);
        assert_eq!(engine.tick(), Some(Tick::Position(9.5)));
        probe.advance(0.5);
        assert_eq!(engine.tick(), Some(Tick::Ended));
        assert!(!engine.frame_scheduled());
        assert_eq!(engine.tick(), None);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events.last(), Some(PlayerEvent::TrackEnded(t)) if t.display_title() == "a"));
        assert_eq!(
            engine.history().recent(1)[0].outcome,
            PlayOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_dispose_releases_everything() {
        let (mut engine, probe) = engine();
        let track = pcm_track(6.0, "a");
        let TrackSource::Memory(blob) = track.source.clone() else {
            unreachable!()
        };
        engine.load_track(track).await.unwrap();
        assert_eq!(blob.live_leases(), 1);
        let player = engine.graph.nodes().unwrap().player;

        engine.dispose();
        assert_eq!(blob.live_leases(), 0);
        assert_eq!(probe.live_nodes(), 0);
        assert!(!engine.is_ready());
        assert_eq!(engine.play(), Err(StateError::NotReady));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(probe
            .events()
            .contains(&BackendEvent::Stopped(player)));
    }

    #[test]
    fn test_effects_before_initialize_are_applied() {
        let backend = NullBackend::new(100);
        let probe = backend.probe();
        let mut engine = AudioEngine::new(backend, EngineConfig::default());
        engine.toggle_3d(true).unwrap();
        engine.set_eq_band(EqBand::High, 6.0).unwrap();
        assert!(engine.get_analyser().is_none());

        engine.initialize().unwrap();
        let nodes = engine.graph.nodes().unwrap();
        assert_eq!(
            probe.spec(nodes.widener),
            Some(crate::audio::backend::NodeSpec::StereoWidener { width: 0.8 })
        );
        assert_eq!(engine.get_analyser().unwrap().size(), 256);
        assert_eq!(engine.frame_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }
}
