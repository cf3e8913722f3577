//! Durable key-value storage with change notifications.
//!
//! This module provides the `KeyValueStore` abstraction the credential
//! store persists into, plus three backends:
//! - `MemoryStore`: contexts opened on a shared in-process `OriginStorage`
//! - `FileStore`: a JSON map in a per-origin directory, polled for outside writes
//! - `KeyringStore`: the OS keychain via `keyring`
//!
//! Every store handle belongs to one execution context (`ContextId`). A
//! store's `watch()` stream only reports changes made by *other* contexts;
//! the context that performed a write is never notified of it.

pub mod file;
pub mod keychain;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::{MemoryStore, OriginStorage};

/// Capacity of the broadcast channel carrying storage events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Backend(String),
}

/// Identifies the execution context that performed a storage write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Writes detected from outside this process.
    pub const EXTERNAL: ContextId = ContextId(0);

    /// Allocate a fresh, process-unique context id.
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A change made to a store by some context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed key. `None` means any key may have changed.
    pub key: Option<String>,
    /// Value after the change; `None` when the key was removed.
    pub new_value: Option<String>,
    pub source: ContextId,
}

impl StorageEvent {
    /// Whether this event may concern `key`.
    pub fn affects(&self, key: &str) -> bool {
        self.key.as_deref().map_or(true, |k| k == key)
    }
}

/// Origin-scoped persistence for string values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Stream of changes made by other contexts.
    fn watch(&self) -> ChangeStream;
}

/// Receiver side of a store's native change notifications.
///
/// Events originating from the stream's own context are skipped.
pub struct ChangeStream {
    rx: broadcast::Receiver<StorageEvent>,
    context: ContextId,
}

impl ChangeStream {
    pub(crate) fn new(rx: broadcast::Receiver<StorageEvent>, context: ContextId) -> Self {
        Self { rx, context }
    }

    /// Wait for the next change made elsewhere.
    ///
    /// Returns `None` once the store has been dropped. If the stream fell
    /// behind, a single event with `key: None` stands in for what was missed.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.source == self.context => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Change stream lagged");
                    return Some(StorageEvent {
                        key: None,
                        new_value: None,
                        source: ContextId::EXTERNAL,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub(crate) fn event_channel() -> broadcast::Sender<StorageEvent> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
