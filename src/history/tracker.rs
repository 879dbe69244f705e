use super::{HistoryDatabase, MemoryHistory, PlayHistory, PlayOutcome, PlayRecord, TrackStats};
use crate::audio::Track;
use crate::error::ResourceError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Persists plays to SQLite. The first storage failure drops the database
/// and keeps going in memory; playback never sees the error.
pub struct HistoryTracker {
    database: Option<HistoryDatabase>,
    fallback: MemoryHistory,
    current: Option<PlayRecord>,
    min_listen_seconds: f64,
}

impl HistoryTracker {
    pub fn new(database: HistoryDatabase) -> Self {
        Self {
            database: Some(database),
            fallback: MemoryHistory::new(),
            current: None,
            min_listen_seconds: 0.0,
        }
    }

    /// Skips shorter than this are not written at all
    pub fn with_min_listen(mut self, seconds: f64) -> Self {
        self.min_listen_seconds = seconds.max(0.0);
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.database.is_none()
    }

    fn save(&mut self, record: &PlayRecord) {
        let Some(db) = &self.database else {
            return;
        };
        if let Err(e) = db.save_play(record) {
            self.degrade(e);
        }
    }

    fn degrade(&mut self, error: ResourceError) {
        warn!("play history unavailable, keeping it in memory: {}", error);
        self.database = None;
    }

    /// Drop a play that was written when it started
    fn discard(&mut self, record: &PlayRecord) {
        let Some(db) = &self.database else {
            return;
        };
        if let Err(e) = db.delete_play(record.play_id) {
            self.degrade(e);
        }
    }
}

impl PlayHistory for HistoryTracker {
    fn record_play(&mut self, track: &Track) {
        self.finish_play(0.0, PlayOutcome::Skipped);

        let record = PlayRecord::start(track);
        debug!("recording play {} of {}", record.play_id, record.title);
        self.save(&record);
        self.current = Some(record);
    }

    fn finish_play(&mut self, listened_seconds: f64, outcome: PlayOutcome) {
        let Some(mut record) = self.current.take() else {
            return;
        };
        record.listened_seconds = listened_seconds.max(0.0);
        record.outcome = outcome;

        if outcome == PlayOutcome::Skipped && record.listened_seconds < self.min_listen_seconds {
            debug!("play of {} too short to keep", record.title);
            self.discard(&record);
            return;
        }

        self.save(&record);
        if self.database.is_none() {
            self.fallback.push(record);
        }
    }

    fn recent(&self, limit: usize) -> Vec<PlayRecord> {
        match &self.database {
            Some(db) => db.recent_plays(limit).unwrap_or_else(|e| {
                warn!("failed to read play history: {}", e);
                Vec::new()
            }),
            None => self.fallback.recent(limit),
        }
    }

    fn track_stats(&self, track_id: Uuid) -> TrackStats {
        match &self.database {
            Some(db) => db.track_stats(track_id).unwrap_or_else(|e| {
                warn!("failed to read play history: {}", e);
                TrackStats::default()
            }),
            None => self.fallback.track_stats(track_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks() -> (Track, Track) {
        (
            Track::remote("https://example.org/a.mp3").with_title("A"),
            Track::remote("https://example.org/b.mp3").with_title("B"),
        )
    }

    #[test]
    fn test_starting_a_play_skips_the_open_one() {
        let (a, b) = tracks();
        let mut tracker = HistoryTracker::new(HistoryDatabase::open_in_memory().unwrap());

        tracker.record_play(&a);
        tracker.record_play(&b);
        tracker.finish_play(30.0, PlayOutcome::Completed);

        let stats = tracker.track_stats(a.id);
        assert_eq!(stats.total_plays, 1);
        assert_eq!(stats.total_skips, 1);
        assert_eq!(tracker.track_stats(b.id).total_listened_seconds, 30.0);
        assert!(!tracker.is_degraded());
    }

    #[test]
    fn test_short_skips_are_dropped() {
        let (a, b) = tracks();
        let mut tracker =
            HistoryTracker::new(HistoryDatabase::open_in_memory().unwrap()).with_min_listen(10.0);

        tracker.record_play(&a);
        tracker.finish_play(2.0, PlayOutcome::Skipped);
        tracker.record_play(&b);
        tracker.finish_play(2.0, PlayOutcome::Completed);

        let recent = tracker.recent(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "B");
        assert_eq!(tracker.track_stats(a.id).total_plays, 0);
    }

    #[test]
    fn test_falls_back_to_memory() {
        let (a, b) = tracks();
        let mut tracker = HistoryTracker::new(HistoryDatabase::open_in_memory().unwrap());
        tracker.degrade(ResourceError::Unavailable("disk went away".into()));
        assert!(tracker.is_degraded());

        tracker.record_play(&a);
        tracker.finish_play(12.0, PlayOutcome::Completed);
        tracker.record_play(&b);
        tracker.finish_play(1.0, PlayOutcome::Skipped);

        let recent = tracker.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "B");
        assert_eq!(tracker.track_stats(a.id).total_plays, 1);
    }
}
