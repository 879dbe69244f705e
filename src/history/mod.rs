// Play history - remembers what was played, for how long, and whether it
// was finished or skipped

pub mod database; // SQLite storage for play records
pub mod tracker;  // the open play + fallback to memory when the db goes away

pub use database::HistoryDatabase;
pub use tracker::HistoryTracker;

use crate::audio::Track;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    InProgress,
    Completed,
    Skipped,
}

impl PlayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayOutcome::InProgress => "in_progress",
            PlayOutcome::Completed => "completed",
            PlayOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(PlayOutcome::InProgress),
            "completed" => Some(PlayOutcome::Completed),
            "skipped" => Some(PlayOutcome::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub play_id: Uuid,
    pub track_id: Uuid,
    pub title: String,
    pub artist: String,
    pub started_at: DateTime<Utc>,
    pub listened_seconds: f64,
    pub outcome: PlayOutcome,
}

impl PlayRecord {
    pub fn start(track: &Track) -> Self {
        Self {
            play_id: Uuid::new_v4(),
            track_id: track.id,
            title: track.display_title(),
            artist: track.display_artist(),
            started_at: Utc::now(),
            listened_seconds: 0.0,
            outcome: PlayOutcome::InProgress,
        }
    }
}

/// Aggregate over the finished plays of one track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub total_plays: u64,
    pub total_skips: u64,
    pub total_listened_seconds: f64,
    pub last_played: Option<DateTime<Utc>>,
}

impl TrackStats {
    pub fn update_from_record(&mut self, record: &PlayRecord) {
        if record.outcome == PlayOutcome::InProgress {
            return;
        }
        self.total_plays += 1;
        if record.outcome == PlayOutcome::Skipped {
            self.total_skips += 1;
        }
        self.total_listened_seconds += record.listened_seconds;
        self.last_played = match self.last_played {
            Some(last) if last >= record.started_at => Some(last),
            _ => Some(record.started_at),
        };
    }

    pub fn skip_ratio(&self) -> f64 {
        self.total_skips as f64 / self.total_plays.max(1) as f64
    }
}

/// Receives every play the engine starts and how it ended
pub trait PlayHistory {
    /// A track started playing. Any play still open is finished as skipped.
    fn record_play(&mut self, track: &Track);

    /// Close the open play, if any
    fn finish_play(&mut self, listened_seconds: f64, outcome: PlayOutcome);

    /// Newest first
    fn recent(&self, limit: usize) -> Vec<PlayRecord>;

    fn track_stats(&self, track_id: Uuid) -> TrackStats;
}

/// History that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryHistory {
    plays: Vec<PlayRecord>,
    open: Option<usize>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a record as-is (used when a database falls back to memory)
    pub(crate) fn push(&mut self, record: PlayRecord) {
        self.plays.push(record);
    }
}

impl PlayHistory for MemoryHistory {
    fn record_play(&mut self, track: &Track) {
        self.finish_play(0.0, PlayOutcome::Skipped);
        self.plays.push(PlayRecord::start(track));
        self.open = Some(self.plays.len() - 1);
    }

    fn finish_play(&mut self, listened_seconds: f64, outcome: PlayOutcome) {
        if let Some(record) = self.open.take().and_then(|i| self.plays.get_mut(i)) {
            record.listened_seconds = listened_seconds.max(record.listened_seconds);
            record.outcome = outcome;
        }
    }

    fn recent(&self, limit: usize) -> Vec<PlayRecord> {
        self.plays.iter().rev().take(limit).cloned().collect()
    }

    fn track_stats(&self, track_id: Uuid) -> TrackStats {
        let mut stats = TrackStats::default();
        for record in self.plays.iter().filter(|r| r.track_id == track_id) {
            stats.update_from_record(record);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_history_closes_open_play() {
        let a = Track::remote("https://example.org/a.mp3").with_title("A");
        let b = Track::remote("https://example.org/b.mp3").with_title("B");
        let mut history = MemoryHistory::new();

        history.record_play(&a);
        history.record_play(&b);
        history.finish_play(181.5, PlayOutcome::Completed);
        // nothing open any more
        history.finish_play(3.0, PlayOutcome::Skipped);

        let recent = history.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "B");
        assert_eq!(recent[0].outcome, PlayOutcome::Completed);
        assert_eq!(recent[0].listened_seconds, 181.5);
        assert_eq!(recent[1].outcome, PlayOutcome::Skipped);

        let stats = history.track_stats(a.id);
        assert_eq!(stats.total_plays, 1);
        assert_eq!(stats.skip_ratio(), 1.0);
    }

    #[test]
    fn test_outcome_names() {
        for outcome in [PlayOutcome::InProgress, PlayOutcome::Completed, PlayOutcome::Skipped] {
            assert_eq!(PlayOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(PlayOutcome::parse("paused"), None);
    }
}
