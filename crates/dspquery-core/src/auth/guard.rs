//! Route access decisions.
//!
//! `decide` is a pure function of the route kind and the authentication
//! flag. `AccessGuard` applies it to the live session state.

use serde::{Deserialize, Serialize};

use super::SessionObserver;

/// Login view
pub const LOGIN_PATH: &str = "/login";

/// Signup view
pub const SIGNUP_PATH: &str = "/signup";

/// Query view, the default destination for authenticated users
pub const PROMPT_PATH: &str = "/prompt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteKind {
    /// Reachable only when authenticated
    Protected,
    /// Reachable only when not authenticated (login, signup)
    PublicOnly,
    /// Anything else, including the root path
    Unmatched,
}

impl RouteKind {
    /// Classify a path. Matching ignores case, a trailing slash, and any
    /// query string or fragment.
    pub fn from_path(path: &str) -> Self {
        let path = path
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        let trimmed = path.trim_end_matches('/');

        if trimmed.eq_ignore_ascii_case(PROMPT_PATH) {
            RouteKind::Protected
        } else if trimmed.eq_ignore_ascii_case(LOGIN_PATH)
            || trimmed.eq_ignore_ascii_case(SIGNUP_PATH)
        {
            RouteKind::PublicOnly
        } else {
            RouteKind::Unmatched
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AccessDecision {
    Allow,
    RedirectToLogin,
    RedirectToApp,
}

impl AccessDecision {
    /// Path to navigate to, or `None` when the route may render
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            AccessDecision::Allow => None,
            AccessDecision::RedirectToLogin => Some(LOGIN_PATH),
            AccessDecision::RedirectToApp => Some(PROMPT_PATH),
        }
    }
}

/// Decide what a route resolves to.
///
/// Unmatched routes always go to the app entry point; an unauthenticated
/// user is then sent on to login by the protected-route rule.
pub fn decide(route: RouteKind, is_authenticated: bool) -> AccessDecision {
    match (route, is_authenticated) {
        (RouteKind::Protected, false) => AccessDecision::RedirectToLogin,
        (RouteKind::PublicOnly, true) => AccessDecision::RedirectToApp,
        (RouteKind::Unmatched, _) => AccessDecision::RedirectToApp,
        _ => AccessDecision::Allow,
    }
}

/// Applies `decide` to the current session state.
#[derive(Clone)]
pub struct AccessGuard {
    session: SessionObserver,
}

impl AccessGuard {
    pub fn new(session: SessionObserver) -> Self {
        Self { session }
    }

    pub fn resolve(&self, path: &str) -> AccessDecision {
        decide(RouteKind::from_path(path), self.session.is_authenticated())
    }

    /// Follow redirects from `path` until a route is allowed.
    pub fn final_destination(&self, path: &str) -> String {
        let mut current = path.to_string();
        // Any chain settles within two hops (unmatched -> app -> login).
        for _ in 0..3 {
            match self.resolve(&current).redirect_target() {
                Some(target) => current = target.to_string(),
                None => break,
            }
        }
        current
    }
}
