//! Authentication module for the bearer credential and session state.
//!
//! This module provides:
//! - `CredentialStore`: persistence of the single bearer token
//! - `SessionObserver`: reactive session state shared across the process
//!   and kept in step with other contexts of the same origin
//! - `AccessGuard`: route access decisions driven by the session

pub mod credentials;
pub mod guard;
pub mod session;

pub use credentials::{CredentialStore, TOKEN_KEY};
pub use guard::{decide, AccessDecision, AccessGuard, RouteKind};
pub use session::{SessionObserver, SessionState, Subscription};
