//! Core library for dspquery.
//!
//! Session and request layer for the DSP natural-language query service:
//! - `storage`: origin-scoped key-value stores with change notifications
//! - `auth`: credential store, session observer and route access guard
//! - `api`: the authenticated JSON request client
//! - `app`: login, signup and query flows wired from a `Config`

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod storage;

pub use api::{ApiClient, RequestOptions, RequestResult, ResponseData};
pub use app::{App, FlowError};
pub use auth::{AccessDecision, AccessGuard, CredentialStore, RouteKind, SessionObserver, SessionState};
pub use config::{Config, StorageBackend};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore, OriginStorage};
