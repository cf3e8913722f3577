//! REST API client module for the DSP backend.
//!
//! This module provides the `ApiClient` for the login, signup and query
//! endpoints. Requests carry the session's bearer token when one is
//! stored, and every outcome is reported as a `RequestResult`.

pub mod client;
pub mod error;
pub mod types;

pub use client::ApiClient;
pub use error::ApiError;
pub use types::{RequestOptions, RequestResult, ResponseData};
