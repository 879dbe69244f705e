//! Durable key-value state
//!
//! Values are JSON wrapped in a `{"version": N, "state": ...}` envelope and
//! kept under a single key. A [`DurableSlot`] that hits a storage error logs
//! it once, swaps its store for a [`MemoryStore`] and carries on.

use crate::error::ResourceError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, info, warn};

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResourceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), ResourceError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, ResourceError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            conn: Connection::open(db_path)?,
        };
        store.initialize_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, ResourceError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<(), ResourceError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResourceError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ResourceError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResourceError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ResourceError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    state: T,
}

/// One versioned value in a key-value store
pub struct DurableSlot<T> {
    store: Box<dyn KeyValueStore>,
    key: String,
    version: u32,
    degraded: bool,
    _state: PhantomData<fn() -> T>,
}

impl<T> DurableSlot<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(store: Box<dyn KeyValueStore>, key: impl Into<String>, version: u32) -> Self {
        Self {
            store,
            key: key.into(),
            version,
            degraded: false,
            _state: PhantomData,
        }
    }

    /// A slot that never touches disk
    pub fn in_memory(key: impl Into<String>, version: u32) -> Self {
        Self::new(Box::new(MemoryStore::new()), key, version)
    }

    /// Open a SQLite-backed slot, falling back to memory if the database
    /// cannot be opened
    pub fn open_or_memory<P: AsRef<Path>>(path: P, key: impl Into<String>, version: u32) -> Self {
        match SqliteStore::open(path.as_ref()) {
            Ok(store) => {
                info!("library state at {}", path.as_ref().display());
                Self::new(Box::new(store), key, version)
            }
            Err(e) => {
                let mut slot = Self::in_memory(key, version);
                slot.degrade(e);
                slot
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Stored state, or the default when there is none or it is unusable
    pub fn load(&mut self) -> T {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => T::default(),
            Err(ResourceError::Corrupt(reason)) => {
                warn!("ignoring stored {}: {}", self.key, reason);
                T::default()
            }
            Err(e) => {
                self.degrade(e);
                T::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<T>, ResourceError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| ResourceError::Corrupt(e.to_string()))?;
        if envelope.version != self.version {
            return Err(ResourceError::Corrupt(format!(
                "version {} (expected {})",
                envelope.version, self.version
            )));
        }
        let state = serde_json::from_value(envelope.state)
            .map_err(|e| ResourceError::Corrupt(e.to_string()))?;
        Ok(Some(state))
    }

    pub fn save(&mut self, state: &T) {
        let raw = match serde_json::to_string(&Envelope {
            version: self.version,
            state,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed to serialize {}: {}", self.key, e);
                return;
            }
        };

        if let Err(e) = self.store.set(&self.key, &raw) {
            self.degrade(e);
            if let Err(e) = self.store.set(&self.key, &raw) {
                debug!("memory store rejected {}: {}", self.key, e);
            }
        }
    }

    fn degrade(&mut self, error: ResourceError) {
        if !self.degraded {
            warn!("durable storage unavailable, keeping state in memory: {}", error);
        }
        self.store = Box::new(MemoryStore::new());
        self.degraded = true;
    }
}
