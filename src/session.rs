//! The single cooperative driver
//!
//! One loop owns the engine and the queue and reacts to four things: queue
//! events (load the new current track), the fetch of the load in flight,
//! frame ticks while playing, and commands from the user. Nothing else runs
//! concurrently with the engine.

use crate::audio::backend::{AudioBackend, EqBand};
use crate::audio::{LoadTicket, PlaybackState, PlayerEvent};
use crate::engine::AudioEngine;
use crate::error::LoadError;
use crate::queue::{QueueEvent, QueueStore};
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

type FetchResult = (LoadTicket, Result<Arc<[u8]>, LoadError>);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Toggle,
    Next,
    Prev,
    Seek(f64),
    Eq(EqBand, f32),
    Compressor(bool),
    ThreeD(bool),
    Volume(f32),
    Remove(usize),
    PlayAt(usize),
    Quit,
}

impl SessionCommand {
    /// Parse one line of user input. Blank lines are `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(None);
        };
        let arg = parts.next();

        let number = |arg: Option<&str>| -> Result<f64, String> {
            arg.ok_or_else(|| format!("'{}' needs a number", cmd))?
                .parse::<f64>()
                .map_err(|e| format!("bad number for '{}': {}", cmd, e))
        };
        let index = |arg: Option<&str>| -> Result<usize, String> {
            arg.ok_or_else(|| format!("'{}' needs an index", cmd))?
                .parse::<usize>()
                .map_err(|e| format!("bad index for '{}': {}", cmd, e))
        };
        let switch = |arg: Option<&str>| -> Result<bool, String> {
            match arg {
                Some("on") => Ok(true),
                Some("off") => Ok(false),
                _ => Err(format!("'{}' takes on|off", cmd)),
            }
        };

        let command = match cmd {
            "p" => SessionCommand::Toggle,
            "n" => SessionCommand::Next,
            "b" => SessionCommand::Prev,
            "s" => SessionCommand::Seek(number(arg)?),
            "eq" => {
                let band = arg
                    .and_then(EqBand::parse)
                    .ok_or_else(|| "eq takes low|mid|high".to_string())?;
                SessionCommand::Eq(band, number(parts.next())? as f32)
            }
            "comp" => SessionCommand::Compressor(switch(arg)?),
            "3d" => SessionCommand::ThreeD(switch(arg)?),
            "vol" => SessionCommand::Volume(number(arg)? as f32),
            "rm" => SessionCommand::Remove(index(arg)?),
            "j" => SessionCommand::PlayAt(index(arg)?),
            "q" => SessionCommand::Quit,
            other => return Err(format!("unknown command '{}'", other)),
        };
        Ok(Some(command))
    }
}

/// What the UI shows; republished after every event
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Title of the track being fetched, while a load is in flight
    pub loading: Option<String>,
    pub index: Option<usize>,
    pub queue_len: usize,
    pub state: PlaybackState,
    pub position: f64,
    pub duration: f64,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            title: None,
            artist: None,
            loading: None,
            index: None,
            queue_len: 0,
            state: PlaybackState::Stopped,
            position: 0.0,
            duration: 0.0,
        }
    }
}

pub struct Session<B: AudioBackend> {
    engine: AudioEngine<B>,
    queue: QueueStore,
    queue_events: mpsc::UnboundedReceiver<QueueEvent>,
    player_events: mpsc::UnboundedReceiver<PlayerEvent>,
    pending: Option<BoxFuture<'static, FetchResult>>,
    now_playing: watch::Sender<NowPlaying>,
}

impl<B: AudioBackend> Session<B> {
    pub fn new(mut engine: AudioEngine<B>, mut queue: QueueStore) -> Self {
        let queue_events = queue.subscribe();
        let (tx, player_events) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);
        if let Err(e) = engine.set_volume(queue.volume()) {
            debug!("could not restore volume: {}", e);
        }
        let (now_playing, _) = watch::channel(NowPlaying::default());

        Self {
            engine,
            queue,
            queue_events,
            player_events,
            pending: None,
            now_playing,
        }
    }

    pub fn engine(&self) -> &AudioEngine<B> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine<B> {
        &mut self.engine
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut QueueStore {
        &mut self.queue
    }

    pub fn now_playing(&self) -> watch::Receiver<NowPlaying> {
        self.now_playing.subscribe()
    }

    pub fn has_pending_load(&self) -> bool {
        self.pending.is_some()
    }

    fn publish(&self) {
        let current = self.engine.current_track();
        self.now_playing.send_replace(NowPlaying {
            title: current.map(|t| t.display_title()),
            artist: current.map(|t| t.display_artist()),
            loading: self.engine.loading_track().map(|t| t.display_title()),
            index: self.queue.current_index(),
            queue_len: self.queue.len(),
            state: self.engine.state(),
            position: self.engine.current_time(),
            duration: self.engine.duration(),
        });
    }

    pub fn handle_queue_event(&mut self, event: QueueEvent) {
        match event {
            QueueEvent::CurrentChanged { index, track } => {
                if !self.engine.is_ready() {
                    debug!("engine not ready, not loading track {}", index);
                    return;
                }
                match self.engine.begin_load(track) {
                    Ok(pending) => self.pending = Some(pending.wait().boxed()),
                    Err(e) => debug!("track {} not loaded: {}", index, e),
                }
            }
            QueueEvent::PlayingChanged(playing) => {
                if playing == self.engine.is_playing() {
                    return;
                }
                let result = if playing {
                    self.engine.play()
                } else {
                    self.engine.pause()
                };
                if let Err(e) = result {
                    debug!("queue asked for playing={}: {}", playing, e);
                }
            }
            QueueEvent::Emptied => {
                self.pending = None;
                self.engine.unload();
            }
        }
    }

    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::TrackStarted(_) | PlayerEvent::TrackResumed { .. } => {
                self.queue.set_playing(true)
            }
            PlayerEvent::TrackPaused { .. } => self.queue.set_playing(false),
            PlayerEvent::TrackEnded(_) => {
                if !self.queue.play_next() {
                    info!("end of queue");
                    self.queue.set_playing(false);
                }
            }
            PlayerEvent::LoadFailed(_) => {
                if !self.engine.is_playing() {
                    self.queue.set_playing(false);
                }
            }
            PlayerEvent::TrackSeeked { .. }
            | PlayerEvent::PositionChanged(_)
            | PlayerEvent::VolumeChanged(_)
            | PlayerEvent::Disposed => {}
        }
    }

    fn handle_fetched(&mut self, (ticket, bytes): FetchResult) {
        self.pending = None;
        match self.engine.finish_load(ticket, bytes) {
            Ok(outcome) => debug!("load {} finished: {:?}", ticket.generation(), outcome),
            Err(e) => debug!("load {} failed: {}", ticket.generation(), e),
        }
    }

    /// Returns `false` when the session should end
    pub fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!("command: {:?}", command);
        let result = match command {
            SessionCommand::Toggle if self.queue.current_index().is_none() => {
                Err("nothing is current in the queue".to_string())
            }
            SessionCommand::Toggle => self.engine.toggle_playback().map_err(|e| e.to_string()),
            SessionCommand::Next => {
                self.queue.play_next();
                Ok(())
            }
            SessionCommand::Prev => {
                self.queue.play_prev();
                Ok(())
            }
            SessionCommand::Seek(seconds) => {
                self.engine.seek(seconds).map(|_| ()).map_err(|e| e.to_string())
            }
            SessionCommand::Eq(band, gain) => {
                self.engine.set_eq_band(band, gain).map_err(|e| e.to_string())
            }
            SessionCommand::Compressor(active) => {
                self.engine.toggle_compressor(active).map_err(|e| e.to_string())
            }
            SessionCommand::ThreeD(active) => {
                self.engine.toggle_3d(active).map_err(|e| e.to_string())
            }
            SessionCommand::Volume(volume) => {
                self.queue.set_volume(volume);
                self.engine.set_volume(volume).map_err(|e| e.to_string())
            }
            SessionCommand::Remove(index) => {
                self.queue.remove_from_queue(index);
                Ok(())
            }
            SessionCommand::PlayAt(index) => {
                self.queue.play_at_index(index);
                Ok(())
            }
            SessionCommand::Quit => return false,
        };
        if let Err(e) = result {
            debug!("command ignored: {}", e);
        }
        true
    }

    /// Handle every queued queue and player event, in arrival order per channel
    pub fn drain_events(&mut self) {
        loop {
            let mut handled = false;
            while let Ok(event) = self.queue_events.try_recv() {
                self.handle_queue_event(event);
                handled = true;
            }
            while let Ok(event) = self.player_events.try_recv() {
                self.handle_player_event(event);
                handled = true;
            }
            if !handled {
                break;
            }
        }
        self.publish();
    }

    /// Drain events and finish loads until nothing is left to do
    pub async fn settle(&mut self) {
        loop {
            self.drain_events();
            match self.pending.take() {
                Some(fetch) => {
                    let fetched = fetch.await;
                    self.handle_fetched(fetched);
                }
                None => break,
            }
        }
    }

    /// One frame, as the run loop would do it
    pub fn frame(&mut self) {
        self.engine.tick();
        self.drain_events();
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) -> Result<()> {
        self.engine.initialize()?;
        if let Some(index) = self.queue.current_index() {
            // the queue was filled before the engine existed
            self.queue.play_at_index(index);
        }
        self.publish();

        let mut frames = tokio::time::interval(self.engine.frame_interval());
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.queue_events.recv() => self.handle_queue_event(event),
                Some(event) = self.player_events.recv() => self.handle_player_event(event),
                fetched = wait_pending(&mut self.pending), if self.pending.is_some() => {
                    self.handle_fetched(fetched);
                }
                _ = frames.tick(), if self.engine.frame_scheduled() => {
                    self.engine.tick();
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
            }
            self.publish();
        }

        info!("session ending");
        self.engine.dispose();
        self.publish();
        Ok(())
    }
}

async fn wait_pending(pending: &mut Option<BoxFuture<'static, FetchResult>>) -> FetchResult {
    match pending {
        Some(fetch) => fetch.await,
        None => futures::future::pending().await,
    }
}
