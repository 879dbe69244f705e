//! Position tracking over a clock that cannot pause
//!
//! The backend clock only ever moves forward, so the playback position is
//! reconstructed from two numbers: the offset accumulated over every finished
//! stretch of playback, and the clock reading captured when the current
//! stretch started. Pausing folds the running stretch into the offset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, hand-driven clock for headless runs and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Move the clock forward. Negative steps are ignored; it is monotonic.
    pub fn advance(&self, seconds: f64) {
        if seconds > 0.0 {
            let next = self.now() + seconds;
            self.bits.store(next.to_bits(), Ordering::Release);
        }
    }
}

/// Reference-time + accumulated-offset playback clock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackClock {
    /// Clock reading when the current stretch of playback began
    reference_time: Option<f64>,
    /// Seconds already played before `reference_time`
    offset: f64,
    duration: f64,
}

impl PlaybackClock {
    /// Fresh clock for a newly bound buffer
    pub fn new(duration: f64) -> Self {
        Self {
            reference_time: None,
            offset: 0.0,
            duration: duration.max(0.0),
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_running(&self) -> bool {
        self.reference_time.is_some()
    }

    /// Begin a stretch of playback at `now`. Call before starting the source.
    pub fn start(&mut self, now: f64) {
        self.reference_time = Some(now);
    }

    /// End the running stretch, folding it into the offset. Idempotent.
    pub fn freeze(&mut self, now: f64) -> f64 {
        if let Some(reference) = self.reference_time.take() {
            let elapsed = (now - reference).max(0.0);
            self.offset = (self.offset + elapsed).min(self.duration);
        }
        self.offset
    }

    /// Jump to `seconds`, clamped to the buffer. Leaves the clock stopped.
    pub fn set_offset(&mut self, seconds: f64) -> f64 {
        self.reference_time = None;
        self.offset = seconds.clamp(0.0, self.duration);
        self.offset
    }

    /// Position at `now`, never past the end of the buffer
    pub fn position(&self, now: f64) -> f64 {
        match self.reference_time {
            Some(reference) => (self.offset + (now - reference).max(0.0)).min(self.duration),
            None => self.offset,
        }
    }
}
