//! File-backed origin storage.
//!
//! All keys of one origin live in a single JSON object at
//! `<dir>/storage.json`. Other processes writing the same file are picked
//! up by a polling watcher and reported as `ContextId::EXTERNAL` changes.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{event_channel, ChangeStream, ContextId, KeyValueStore, StorageError, StorageEvent};

/// Storage file name in the origin directory
const STORAGE_FILE: &str = "storage.json";

/// How often the watcher re-reads the storage file.
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

struct Inner {
    path: PathBuf,
    /// Contents as of this handle's last read or write.
    snapshot: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    context: ContextId,
    poll_interval: Duration,
    watcher_started: AtomicBool,
}

/// Durable store persisted as JSON in a per-origin directory.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        Self::with_poll_interval(dir, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn with_poll_interval(dir: impl AsRef<Path>, poll_interval: Duration) -> Self {
        let path = dir.as_ref().join(STORAGE_FILE);
        let snapshot = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to read storage file");
                HashMap::new()
            }
        };

        Self {
            inner: Arc::new(Inner {
                path,
                snapshot: Mutex::new(snapshot),
                events: event_channel(),
                context: ContextId::next(),
                poll_interval,
                watcher_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn update<F>(&self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let mut snapshot = self.inner.snapshot.lock();
        let mut entries = read_entries(&self.inner.path)?;
        self.inner.announce_external(&snapshot, &entries);
        mutate(&mut entries);
        write_entries(&self.inner.path, &entries, self.inner.context)?;
        *snapshot = entries;
        Ok(())
    }

    fn start_watcher(&self) {
        if self.inner.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime; storage file changes will not be watched");
                self.inner.watcher_started.store(false, Ordering::SeqCst);
                return;
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.poll_interval;
        handle.spawn(watch_file(weak, interval));
    }
}

async fn watch_file(weak: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.poll();
    }
    debug!("Storage file watcher stopped");
}

impl Inner {
    /// Diff the file against the snapshot and broadcast what changed.
    fn poll(&self) {
        let mut snapshot = self.snapshot.lock();
        let current = match read_entries(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "Skipping storage poll");
                return;
            }
        };

        self.announce_external(&snapshot, &current);
        *snapshot = current;
    }

    /// Broadcast every key that differs between `snapshot` and `current`.
    fn announce_external(
        &self,
        snapshot: &HashMap<String, String>,
        current: &HashMap<String, String>,
    ) {
        let keys: BTreeSet<&String> = snapshot.keys().chain(current.keys()).collect();
        for key in keys {
            let new_value = current.get(key);
            if snapshot.get(key) != new_value {
                debug!(key = %key, "Storage file changed externally");
                let _ = self.events.send(StorageEvent {
                    key: Some(key.clone()),
                    new_value: new_value.cloned(),
                    source: ContextId::EXTERNAL,
                });
            }
        }
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, String>, StorageError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn write_entries(
    path: &Path,
    entries: &HashMap<String, String>,
    context: ContextId,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension(format!("json.{}-{}.tmp", std::process::id(), context.0));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = read_entries(&self.inner.path)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if !self.inner.path.exists() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn watch(&self) -> ChangeStream {
        let stream = ChangeStream::new(self.inner.events.subscribe(), self.inner.context);
        self.start_watcher();
        stream
    }
}
