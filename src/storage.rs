use crate::errors::{Error, Result};
use crate::models::State;
use crate::periods::normalize_periods;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::fs;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

pub const PRIMARY_KEY: &str = "app-data";
pub const STORAGE_VERSION: &str = "1.0";

/// Durable string storage addressed by key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;

    /// Replaces the value; readers see either the old or the new value, never a mix.
    fn set(&self, key: &str, value: &str) -> io::Result<()>;

    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(key)).map_err(|err| err.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// In-process store. Clones share the same entries, which lets tests
/// rebuild a manager from "disk" without any in-memory carryover.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail like a full quota would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().ok().and_then(|entries| entries.get(key).cloned())
    }

    fn entries(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("storage quota exceeded"));
        }
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// A state read back from a durable channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub sequence: u64,
    pub written_at: DateTime<Utc>,
    pub state: State,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a> {
    version: &'a str,
    saved_at: DateTime<Utc>,
    sequence: u64,
    state: &'a State,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    version: String,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    sequence: u64,
    state: State,
}

/// Primary durable copy of the state.
#[derive(Clone)]
pub struct PersistenceChannel {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl PersistenceChannel {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, PRIMARY_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn save(&self, state: &State, sequence: u64) -> Result<()> {
        let envelope = EnvelopeRef {
            version: STORAGE_VERSION,
            saved_at: Utc::now(),
            sequence,
            state,
        };
        let payload = serde_json::to_string(&envelope)?;
        self.store
            .set(&self.key, &payload)
            .map_err(|err| Error::Persistence(format!("writing `{}`: {err}", self.key)))?;
        debug!(key = %self.key, sequence, bytes = payload.len(), "state saved");
        Ok(())
    }

    /// Reads the stored state. Missing, garbled or foreign-version data yields `None`.
    pub fn load(&self) -> Option<LoadedState> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                error!("failed to read `{}`: {err}", self.key);
                return None;
            }
        };

        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!("failed to parse `{}`: {err}", self.key);
                return None;
            }
        };

        if envelope.version != STORAGE_VERSION {
            warn!(
                key = %self.key,
                found = %envelope.version,
                expected = STORAGE_VERSION,
                "storage version mismatch, ignoring stored state"
            );
            return None;
        }

        Some(LoadedState {
            sequence: envelope.sequence,
            written_at: envelope.saved_at,
            state: sanitize(envelope.state),
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)?;
        Ok(())
    }
}

/// Storage-boundary repair applied to every state read from disk.
pub(crate) fn sanitize(mut state: State) -> State {
    let repaired = normalize_periods(&mut state);
    if repaired > 0 {
        warn!(repaired, "repaired period records in stored state");
    }
    state.recompute_user_points();
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeriodRecord;
    use chrono::NaiveDate;

    fn state_with_period(id: &str) -> State {
        let mut state = State::default();
        state.current_period = Some(PeriodRecord::new(
            id,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            None,
            Utc::now(),
        ));
        state
    }

    #[test]
    fn save_then_load_returns_saved_period() {
        let store = Arc::new(MemoryStore::new());
        let channel = PersistenceChannel::new(store);
        channel.save(&state_with_period("p1"), 4).unwrap();

        let loaded = channel.load().expect("stored state");
        assert_eq!(loaded.sequence, 4);
        assert_eq!(loaded.state.current_period.unwrap().id, "p1");
    }

    #[test]
    fn load_rejects_other_versions_and_garbage() {
        let store = Arc::new(MemoryStore::new());
        let channel = PersistenceChannel::new(store.clone());

        store
            .set(PRIMARY_KEY, r#"{"version":"0.9","savedAt":"2025-01-01T00:00:00Z","state":{}}"#)
            .unwrap();
        assert!(channel.load().is_none());

        store.set(PRIMARY_KEY, "{not json").unwrap();
        assert!(channel.load().is_none());

        store.remove(PRIMARY_KEY).unwrap();
        assert!(channel.load().is_none());
    }

    #[test]
    fn envelope_without_sequence_loads_as_zero() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(PRIMARY_KEY, r#"{"version":"1.0","savedAt":"2025-01-01T00:00:00Z","state":{}}"#)
            .unwrap();
        let loaded = PersistenceChannel::new(store).load().unwrap();
        assert_eq!(loaded.sequence, 0);
    }

    #[test]
    fn file_store_overwrites_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert_eq!(store.get("app-data").unwrap(), None);
        store.set("app-data", "first value that is long").unwrap();
        store.set("app-data", "second").unwrap();
        assert_eq!(store.get("app-data").unwrap().as_deref(), Some("second"));

        store.remove("app-data").unwrap();
        store.remove("app-data").unwrap();
        assert_eq!(store.get("app-data").unwrap(), None);
    }

    #[test]
    fn failing_store_surfaces_persistence_error() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let channel = PersistenceChannel::new(Arc::new(store));
        let err = channel.save(&State::default(), 1).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
