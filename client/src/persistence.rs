//! Filter persistence over a small key-value store.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use relatos_shared::FilterState;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;

pub const DEFAULT_FILTERS_KEY: &str = "relatos_filters";

/// A string-keyed slot store, the native counterpart of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<platform data dir>/relatos`, falling back to the working directory.
    pub fn default_location() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("relatos"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local store, mostly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
        Ok(())
    }
}

const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredFilters {
    // Absent in slots written before versioning; those are read as version 1.
    #[serde(default = "legacy_version")]
    version: u32,
    #[serde(flatten)]
    state: FilterState,
}

fn legacy_version() -> u32 {
    SCHEMA_VERSION
}

/// Reads and writes the filter selection under a fixed key.
#[derive(Clone)]
pub struct FilterPersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl FilterPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn with_default_key(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, DEFAULT_FILTERS_KEY)
    }

    /// In-memory persistence that forgets everything with the process.
    pub fn ephemeral() -> Self {
        Self::with_default_key(Arc::new(MemoryStore::new()))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Never fails: missing, unreadable or malformed slots give the default.
    pub fn load(&self) -> FilterState {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return FilterState::default(),
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to read saved filters");
                return FilterState::default();
            }
        };

        match serde_json::from_str::<StoredFilters>(&raw) {
            Ok(stored) if stored.version <= SCHEMA_VERSION => {
                debug!(key = %self.key, "restored saved filters");
                stored.state
            }
            Ok(stored) => {
                warn!(key = %self.key, version = stored.version, "saved filters use an unknown schema version");
                FilterState::default()
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "discarding malformed saved filters");
                FilterState::default()
            }
        }
    }

    /// Failures are logged and otherwise ignored.
    pub fn save(&self, state: &FilterState) {
        let stored = StoredFilters {
            version: SCHEMA_VERSION,
            state: state.clone(),
        };
        let result = serde_json::to_string(&stored)
            .map_err(StorageError::from)
            .and_then(|json| self.store.set(&self.key, &json));
        if let Err(err) = result {
            warn!(key = %self.key, error = %err, "failed to save filters");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> FilterState {
        FilterState {
            categories: vec!["Medo".into(), "Alívio".into()],
            show_liked: true,
        }
    }

    #[test]
    fn round_trip_survives_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let first = FilterPersistence::with_default_key(Arc::new(FileStore::new(dir.path())));
        first.save(&sample());

        // A fresh handle on the same directory stands in for a restart.
        let second = FilterPersistence::with_default_key(Arc::new(FileStore::new(dir.path())));
        assert_eq!(second.load(), sample());
    }

    #[test]
    fn missing_slot_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilterPersistence::with_default_key(Arc::new(FileStore::new(dir.path())));
        assert_eq!(persistence.load(), FilterState::default());
    }

    #[test]
    fn corrupted_slot_gives_default() {
        let store = Arc::new(MemoryStore::new());
        store.set(DEFAULT_FILTERS_KEY, "{not json").unwrap();
        let persistence = FilterPersistence::with_default_key(store.clone());
        assert_eq!(persistence.load(), FilterState::default());

        store.set(DEFAULT_FILTERS_KEY, r#"{"categories": 3}"#).unwrap();
        assert_eq!(persistence.load(), FilterState::default());
    }

    #[test]
    fn legacy_unversioned_slot_is_accepted() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(DEFAULT_FILTERS_KEY, r#"{"categories":["Medo"],"showLiked":false}"#)
            .unwrap();
        let persistence = FilterPersistence::with_default_key(store);
        assert_eq!(
            persistence.load(),
            FilterState {
                categories: vec!["Medo".into()],
                show_liked: false,
            }
        );
    }

    #[test]
    fn newer_schema_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(DEFAULT_FILTERS_KEY, r#"{"version":9,"categories":["Medo"],"showLiked":true}"#)
            .unwrap();
        let persistence = FilterPersistence::with_default_key(store);
        assert_eq!(persistence.load(), FilterState::default());
    }

    #[test]
    fn saved_slot_carries_version() {
        let store = Arc::new(MemoryStore::new());
        let persistence = FilterPersistence::with_default_key(store.clone());
        persistence.save(&sample());
        let raw = store.get(DEFAULT_FILTERS_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["showLiked"], true);
    }

    #[test]
    fn save_failure_is_not_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file where a directory is expected makes every write fail.
        let persistence =
            FilterPersistence::with_default_key(Arc::new(FileStore::new(file.path().join("sub"))));
        persistence.save(&sample());
        assert_eq!(persistence.load(), FilterState::default());
    }
}
