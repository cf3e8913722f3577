use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::{ChangeStream, KeyValueStore};

/// Storage key holding the bearer token
pub const TOKEN_KEY: &str = "jwt_token";

/// Persistence for the single bearer credential.
///
/// Storage failures never reach the caller: reads degrade to an empty
/// token and writes become no-ops.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, TOKEN_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored token, or an empty string when absent or unreadable
    pub fn get(&self) -> String {
        match self.store.get(&self.key) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to read credential, treating as absent");
                String::new()
            }
        }
    }

    /// Persist `token`. An empty token is ignored rather than clearing.
    pub fn set(&self, token: &str) {
        if token.is_empty() {
            debug!("Ignoring empty credential");
            return;
        }
        if let Err(e) = self.store.set(&self.key, token) {
            warn!(error = %e, "Failed to store credential");
        }
    }

    /// Remove the stored token
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(error = %e, "Failed to clear credential");
        }
    }

    /// Changes to the underlying storage made by other contexts
    pub fn watch(&self) -> ChangeStream {
        self.store.watch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OriginStorage;

    fn credential_store(origin: &OriginStorage) -> CredentialStore {
        CredentialStore::new(Arc::new(origin.open_context()))
    }

    #[test]
    fn test_set_then_get() {
        let origin = OriginStorage::new();
        let creds = credential_store(&origin);
        assert_eq!(creds.get(), "");

        creds.set("abc");
        assert_eq!(creds.get(), "abc");

        creds.set("def");
        assert_eq!(creds.get(), "def");
    }

    #[test]
    fn test_empty_set_does_not_overwrite() {
        let origin = OriginStorage::new();
        let creds = credential_store(&origin);
        creds.set("abc");
        creds.set("");
        assert_eq!(creds.get(), "abc");
    }

    #[test]
    fn test_clear_from_any_state() {
        let origin = OriginStorage::new();
        let creds = credential_store(&origin);

        creds.clear();
        assert_eq!(creds.get(), "");

        creds.set("abc");
        creds.clear();
        assert_eq!(creds.get(), "");
        creds.clear();
        assert_eq!(creds.get(), "");
    }

    #[test]
    fn test_unavailable_storage_degrades_to_absent() {
        let origin = OriginStorage::new();
        let creds = credential_store(&origin);
        creds.set("abc");

        origin.set_available(false);
        assert_eq!(creds.get(), "");
        creds.set("def");
        creds.clear();

        origin.set_available(true);
        assert_eq!(creds.get(), "abc");
    }

    #[test]
    fn test_quota_error_is_swallowed() {
        let origin = OriginStorage::with_quota(12);
        let creds = credential_store(&origin);
        creds.set("a-token-that-does-not-fit");
        assert_eq!(creds.get(), "");
    }

    #[test]
    fn test_custom_key() {
        let origin = OriginStorage::new();
        let tab = Arc::new(origin.open_context());
        let creds = CredentialStore::with_key(tab.clone(), "other_token");
        creds.set("abc");
        assert_eq!(creds.key(), "other_token");
        assert_eq!(tab.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(tab.get("other_token").unwrap().as_deref(), Some("abc"));
    }
}
