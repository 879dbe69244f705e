use super::{PlayOutcome, PlayRecord, TrackStats};
use crate::error::ResourceError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

pub struct HistoryDatabase {
    conn: Connection,
}

impl HistoryDatabase {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ResourceError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, ResourceError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<(), ResourceError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS plays (
                play_id TEXT PRIMARY KEY,
                track_id TEXT NOT NULL,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                started_at TEXT NOT NULL,
                listened_seconds REAL NOT NULL DEFAULT 0.0,
                outcome TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plays_track_id ON plays(track_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plays_started_at ON plays(started_at)",
            [],
        )?;

        Ok(())
    }

    pub fn save_play(&self, record: &PlayRecord) -> Result<(), ResourceError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO plays
             (play_id, track_id, title, artist, started_at, listened_seconds, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.play_id.to_string(),
                record.track_id.to_string(),
                record.title,
                record.artist,
                record.started_at.to_rfc3339(),
                record.listened_seconds,
                record.outcome.as_str(),
            ],
        )?;

        Ok(())
    }

    pub fn delete_play(&self, play_id: Uuid) -> Result<(), ResourceError> {
        self.conn
            .execute("DELETE FROM plays WHERE play_id = ?1", params![play_id.to_string()])?;
        Ok(())
    }

    pub fn get_play(&self, play_id: Uuid) -> Result<Option<PlayRecord>, ResourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT play_id, track_id, title, artist, started_at, listened_seconds, outcome
             FROM plays WHERE play_id = ?1",
        )?;

        let record = stmt
            .query_row(params![play_id.to_string()], row_to_play)
            .optional()?;

        Ok(record)
    }

    pub fn recent_plays(&self, limit: usize) -> Result<Vec<PlayRecord>, ResourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT play_id, track_id, title, artist, started_at, listened_seconds, outcome
             FROM plays ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], row_to_play)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn track_stats(&self, track_id: Uuid) -> Result<TrackStats, ResourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT COUNT(*),
                    COALESCE(SUM(outcome = 'skipped'), 0),
                    COALESCE(SUM(listened_seconds), 0.0),
                    MAX(started_at)
             FROM plays WHERE track_id = ?1 AND outcome != 'in_progress'",
        )?;

        let stats = stmt.query_row(params![track_id.to_string()], |row| {
            let last_played: Option<String> = row.get(3)?;
            Ok(TrackStats {
                total_plays: row.get::<_, i64>(0)? as u64,
                total_skips: row.get::<_, i64>(1)? as u64,
                total_listened_seconds: row.get(2)?,
                last_played: last_played.and_then(|s| parse_timestamp(&s)),
            })
        })?;

        Ok(stats)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_play(row: &Row) -> rusqlite::Result<PlayRecord> {
    let started_at: String = row.get(4)?;
    let outcome: String = row.get(6)?;

    Ok(PlayRecord {
        play_id: parse_uuid(row, 0)?,
        track_id: parse_uuid(row, 1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        started_at: parse_timestamp(&started_at).unwrap_or_else(Utc::now),
        listened_seconds: row.get(5)?,
        outcome: PlayOutcome::parse(&outcome).unwrap_or(PlayOutcome::Skipped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Track;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_play_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history").join("plays.db");
        let track = Track::remote("https://example.org/x.mp3").with_title("X");

        let mut record = PlayRecord::start(&track);
        {
            let db = HistoryDatabase::new(&path).unwrap();
            db.save_play(&record).unwrap();
            record.listened_seconds = 42.0;
            record.outcome = PlayOutcome::Completed;
            db.save_play(&record).unwrap();
        }

        let db = HistoryDatabase::new(&path).unwrap();
        let loaded = db.get_play(record.play_id).unwrap().unwrap();
        assert_eq!(loaded.title, "X");
        assert_eq!(loaded.listened_seconds, 42.0);
        assert_eq!(loaded.outcome, PlayOutcome::Completed);
        assert_eq!(db.recent_plays(5).unwrap().len(), 1);
    }

    #[test]
    fn test_track_stats_ignore_open_plays() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        let track = Track::remote("https://example.org/y.mp3");

        let mut first = PlayRecord::start(&track);
        first.started_at = first.started_at - Duration::minutes(10);
        first.listened_seconds = 12.0;
        first.outcome = PlayOutcome::Skipped;
        let mut second = PlayRecord::start(&track);
        second.listened_seconds = 200.0;
        second.outcome = PlayOutcome::Completed;
        let open = PlayRecord::start(&track);
        for record in [&first, &second, &open] {
            db.save_play(record).unwrap();
        }

        let stats = db.track_stats(track.id).unwrap();
        assert_eq!(stats.total_plays, 2);
        assert_eq!(stats.total_skips, 1);
        assert_eq!(stats.total_listened_seconds, 212.0);
        assert!(stats.last_played.is_some());

        let recent = db.recent_plays(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_ne!(recent[0].play_id, first.play_id);

        assert_eq!(db.track_stats(Uuid::new_v4()).unwrap(), TrackStats::default());
    }
}
