use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CredentialStore;

/// Authentication state derived from the stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionState {
    pub token: Option<String>,
    pub is_authenticated: bool,
}

impl SessionState {
    pub fn from_token(token: String) -> Self {
        if token.is_empty() {
            Self::default()
        } else {
            Self {
                token: Some(token),
                is_authenticated: true,
            }
        }
    }
}

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;

struct Inner {
    credentials: CredentialStore,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    forwarding: AtomicBool,
}

impl Inner {
    fn state(&self) -> SessionState {
        SessionState::from_token(self.credentials.get())
    }

    /// Invoke every listener with a fresh snapshot.
    /// The listener list is copied first so listeners may (un)subscribe.
    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        let state = self.state();
        debug!(
            listeners = listeners.len(),
            authenticated = state.is_authenticated,
            "Notifying session listeners"
        );
        for listener in listeners {
            listener(&state);
        }
    }

    fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Reactive view over the credential store, shared by every consumer.
///
/// Holds no copy of the token: every read goes to the store. Clone is
/// cheap and all clones share one listener list.
#[derive(Clone)]
pub struct SessionObserver {
    inner: Arc<Inner>,
}

impl SessionObserver {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                forwarding: AtomicBool::new(false),
            }),
        }
    }

    /// Register `listener`, called whenever the credential may have changed,
    /// in this context or another one.
    ///
    /// The first subscription inside a tokio runtime starts forwarding of
    /// other contexts' changes (see `start_external_listener`). The listener
    /// stays registered until the returned `Subscription` is dropped or
    /// `unsubscribe` is called.
    #[must_use = "dropping the Subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        let _ = self.start_external_listener();
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Snapshot of the current state, read straight from the store
    pub fn current_state(&self) -> SessionState {
        self.inner.state()
    }

    /// Bearer token, if one is stored
    pub fn token(&self) -> Option<String> {
        self.current_state().token
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_state().is_authenticated
    }

    /// Store `token` and notify local listeners before returning.
    /// An empty token leaves the stored credential untouched.
    pub fn set_credential(&self, token: &str) {
        self.inner.credentials.set(token);
        if !token.is_empty() {
            info!("Credential stored");
        }
        self.inner.notify();
    }

    /// Clear the credential and notify local listeners before returning.
    pub fn logout(&self) {
        self.inner.credentials.clear();
        info!("Logged out");
        self.inner.notify();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Forward changes made by other contexts to the listeners.
    ///
    /// Runs at most once per observer: returns `None` when forwarding is
    /// already running or there is no tokio runtime to run it on. The store's
    /// change stream is opened before this returns, so nothing written
    /// afterwards is missed. The task ends once the store is gone or every
    /// handle to this observer has been dropped.
    pub fn start_external_listener(&self) -> Option<JoinHandle<()>> {
        if self.inner.forwarding.swap(true, Ordering::SeqCst) {
            return None;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime; changes from other contexts will not be delivered");
                self.inner.forwarding.store(false, Ordering::SeqCst);
                return None;
            }
        };

        let mut changes = self.inner.credentials.watch();
        let key = self.inner.credentials.key().to_string();
        let weak = Arc::downgrade(&self.inner);

        Some(handle.spawn(async move {
            while let Some(event) = changes.next().await {
                if !event.affects(&key) {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!(source = ?event.source, "Credential changed in another context");
                inner.notify();
            }
            debug!("External session listener stopped");
        }))
    }
}

/// Handle returned by `SessionObserver::subscribe`.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
    active: AtomicBool,
}

impl Subscription {
    /// Deregister the listener. Calls after the first are no-ops.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_listener(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
