//! In-process origin storage shared by several execution contexts.
//!
//! An `OriginStorage` is the storage area of one origin; each
//! `MemoryStore` opened on it is a separate context (the equivalent of a
//! browser tab). A write made through one context is broadcast to the
//! others, never back to the writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::{event_channel, ChangeStream, ContextId, KeyValueStore, StorageError, StorageEvent};

struct Shared {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    quota: Option<usize>,
    available: AtomicBool,
}

/// Shared storage area for one origin.
/// Clone is cheap - clones refer to the same area.
#[derive(Clone)]
pub struct OriginStorage {
    shared: Arc<Shared>,
}

impl OriginStorage {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Storage area that rejects writes once keys and values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(quota: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                events: event_channel(),
                quota,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate storage being disabled (or re-enabled) for every context.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Open a new execution context on this origin.
    pub fn open_context(&self) -> MemoryStore {
        MemoryStore {
            shared: Arc::clone(&self.shared),
            context: ContextId::next(),
        }
    }
}

impl Default for OriginStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's handle on an `OriginStorage`.
pub struct MemoryStore {
    shared: Arc<Shared>,
    context: ContextId,
}

impl MemoryStore {
    pub fn context(&self) -> ContextId {
        self.context
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("storage is disabled".to_string()))
        }
    }

    fn announce(&self, key: &str, new_value: Option<String>) {
        let receivers = self
            .shared
            .events
            .send(StorageEvent {
                key: Some(key.to_string()),
                new_value,
                source: self.context,
            })
            .unwrap_or(0);
        debug!(key, receivers, context = ?self.context, "Storage change broadcast");
    }
}

fn usage_with(entries: &HashMap<String, String>, key: &str, value: &str) -> usize {
    entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum::<usize>()
        + key.len()
        + value.len()
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_available()?;
        Ok(self.shared.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        {
            let mut entries = self.shared.entries.write();
            if let Some(quota) = self.shared.quota {
                let needed = usage_with(&entries, key, value);
                if needed > quota {
                    return Err(StorageError::QuotaExceeded { needed, quota });
                }
            }
            let previous = entries.insert(key.to_string(), value.to_string());
            if previous.as_deref() == Some(value) {
                return Ok(());
            }
        }
        self.announce(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        let removed = self.shared.entries.write().remove(key);
        if removed.is_some() {
            self.announce(key, None);
        }
        Ok(())
    }

    fn watch(&self) -> ChangeStream {
        ChangeStream::new(self.shared.events.subscribe(), self.context)
    }
}
