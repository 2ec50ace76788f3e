//! Durable cache for the dashboard snapshot and the pipeline flag.
//!
//! Exactly four keys are persisted. The snapshot's freshness is decided from
//! `cache_timestamp` alone, so a TTL check never has to parse the snapshot.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::CacheError;
use crate::types::{DashboardSnapshot, PipelineState};

pub const ETL_COMPLETED_KEY: &str = "etl_completed";
pub const DATA_LAST_UPDATED_KEY: &str = "data_last_updated";
pub const CACHED_DASHBOARD_KEY: &str = "cached_dashboard_data";
pub const CACHE_TIMESTAMP_KEY: &str = "cache_timestamp";

pub const PERSISTED_KEYS: [&str; 4] = [
    ETL_COMPLETED_KEY,
    DATA_LAST_UPDATED_KEY,
    CACHED_DASHBOARD_KEY,
    CACHE_TIMESTAMP_KEY,
];

/// String key/value persistence. Every write is a whole-value overwrite.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn write(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory. Writes go to a temp file and
/// are renamed into place so a crash never leaves a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(self.path(key)) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            key: key.to_string(),
            source,
        };
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, self.path(key)).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Snapshot and pipeline-state persistence with a single-entry TTL policy.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Persist `snapshot`, replacing any previous one. The TTL clock starts
    /// at the snapshot's own `captured_at`.
    pub fn put(&self, snapshot: &DashboardSnapshot) -> Result<(), CacheError> {
        let body = serde_json::to_string(snapshot).map_err(|source| CacheError::Serialization {
            key: CACHED_DASHBOARD_KEY.to_string(),
            source,
        })?;
        self.store.write(CACHED_DASHBOARD_KEY, &body)?;
        self.store.write(
            CACHE_TIMESTAMP_KEY,
            &snapshot.captured_at.timestamp_millis().to_string(),
        )?;
        log::debug!(
            "cached snapshot captured_at={} bytes={}",
            snapshot.captured_at,
            body.len()
        );
        Ok(())
    }

    /// Age of the persisted snapshot in milliseconds, if one is recorded.
    pub fn age_ms(&self) -> Option<i64> {
        let raw = self.read_or_warn(CACHE_TIMESTAMP_KEY)?;
        match raw.trim().parse::<i64>() {
            Ok(captured) => Some((self.clock.now().timestamp_millis() - captured).max(0)),
            Err(e) => {
                log::warn!("discarding corrupt cache timestamp: {e}");
                self.discard_snapshot();
                None
            }
        }
    }

    /// True when a snapshot exists and is no older than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        match self.age_ms() {
            Some(age) => age <= max_age.as_millis() as i64,
            None => false,
        }
    }

    /// The persisted snapshot if it is within `max_age`, otherwise a miss.
    pub fn get(&self, max_age: Duration) -> Option<DashboardSnapshot> {
        if !self.is_fresh(max_age) {
            return None;
        }
        self.peek()
    }

    /// The persisted snapshot regardless of age.
    pub fn peek(&self) -> Option<DashboardSnapshot> {
        let body = self.read_or_warn(CACHED_DASHBOARD_KEY)?;
        match serde_json::from_str::<DashboardSnapshot>(&body) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("discarding corrupt cached snapshot: {e}");
                self.discard_snapshot();
                None
            }
        }
    }

    pub fn load_pipeline_state(&self) -> PipelineState {
        let etl_completed = self
            .read_or_warn(ETL_COMPLETED_KEY)
            .map(|raw| raw.trim() == "true")
            .unwrap_or(false);
        let last_updated = self
            .read_or_warn(DATA_LAST_UPDATED_KEY)
            .and_then(|raw| match serde_json::from_str::<DateTime<Utc>>(&raw) {
                Ok(at) => Some(at),
                Err(e) => {
                    log::warn!("ignoring corrupt {DATA_LAST_UPDATED_KEY}: {e}");
                    None
                }
            });
        PipelineState {
            etl_completed,
            last_updated,
        }
    }

    pub fn save_pipeline_state(&self, state: &PipelineState) -> Result<(), CacheError> {
        self.store
            .write(ETL_COMPLETED_KEY, if state.etl_completed { "true" } else { "false" })?;
        match &state.last_updated {
            Some(at) => {
                let body =
                    serde_json::to_string(at).map_err(|source| CacheError::Serialization {
                        key: DATA_LAST_UPDATED_KEY.to_string(),
                        source,
                    })?;
                self.store.write(DATA_LAST_UPDATED_KEY, &body)
            }
            None => self.store.remove(DATA_LAST_UPDATED_KEY),
        }
    }

    /// Remove every persisted key of this subsystem.
    pub fn clear(&self) -> Result<(), CacheError> {
        for key in PERSISTED_KEYS {
            self.store.remove(key)?;
        }
        log::info!("cleared persisted dashboard state");
        Ok(())
    }

    fn read_or_warn(&self, key: &str) -> Option<String> {
        match self.store.read(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("cache read failed key={key}: {e}");
                None
            }
        }
    }

    fn discard_snapshot(&self) {
        for key in [CACHED_DASHBOARD_KEY, CACHE_TIMESTAMP_KEY] {
            if let Err(e) = self.store.remove(key) {
                log::warn!("failed to remove corrupt cache entry key={key}: {e}");
            }
        }
    }
}
