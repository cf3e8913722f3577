//! OS keychain storage via `keyring`.

use std::collections::HashMap;

use keyring::credential::{CredentialBuilder, CredentialBuilderApi};
use keyring::Entry;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{event_channel, ChangeStream, ContextId, KeyValueStore, StorageError, StorageEvent};

/// Keychain service name used when none is given
pub const DEFAULT_SERVICE_NAME: &str = "dspquery";

/// Stores each key as a keychain entry under one service name.
///
/// Entries live in the platform keychain, so every store opened with the
/// same service name sees the same values. The keychain has no change
/// feed, so `watch()` never yields.
pub struct KeyringStore {
    service: String,
    /// Overrides the platform credential store when set
    builder: Option<Box<CredentialBuilder>>,
    entries: Mutex<HashMap<String, Entry>>,
    events: broadcast::Sender<StorageEvent>,
    context: ContextId,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self::build(service.into(), None)
    }

    /// Store whose entries come from `builder` instead of the platform keychain
    pub fn with_credential_builder(
        service: impl Into<String>,
        builder: Box<CredentialBuilder>,
    ) -> Self {
        Self::build(service.into(), Some(builder))
    }

    fn build(service: String, builder: Option<Box<CredentialBuilder>>) -> Self {
        Self {
            service,
            builder,
            entries: Mutex::new(HashMap::new()),
            events: event_channel(),
            context: ContextId::next(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn with_entry<T>(
        &self,
        key: &str,
        op: impl FnOnce(&Entry) -> keyring::Result<T>,
    ) -> Result<T, StorageError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            let entry = match &self.builder {
                Some(builder) => Entry::new_with_credential(
                    builder
                        .build(None, &self.service, key)
                        .map_err(keychain_error)?,
                ),
                None => Entry::new(&self.service, key).map_err(keychain_error)?,
            };
            entries.insert(key.to_string(), entry);
        }
        let entry = entries
            .get(key)
            .ok_or_else(|| StorageError::Backend(format!("missing keychain entry for {key}")))?;
        op(entry).map_err(keychain_error)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

fn keychain_error(e: keyring::Error) -> StorageError {
    match e {
        keyring::Error::NoStorageAccess(inner) => StorageError::Unavailable(inner.to_string()),
        keyring::Error::PlatformFailure(inner) => StorageError::Unavailable(inner.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_entry(key, |entry| entry.set_password(value))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
    }

    fn watch(&self) -> ChangeStream {
        ChangeStream::new(self.events.subscribe(), self.context)
    }
}
