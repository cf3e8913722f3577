use thiserror::Error;

use super::RequestResult;

/// Failures on the request path before a response is available.
///
/// These never escape `ApiClient::request`; they are folded into a
/// `RequestResult` with status 0.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Maximum length for response bodies in log messages
const MAX_LOGGED_BODY_LENGTH: usize = 500;

impl ApiError {
    pub fn invalid_header(name: &str, reason: impl ToString) -> Self {
        ApiError::InvalidHeader {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Truncate a response body to avoid logging excessive data
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_LOGGED_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_LOGGED_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

impl From<ApiError> for RequestResult {
    fn from(err: ApiError) -> Self {
        RequestResult::transport_failure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(ApiError::truncate_body("short"), "short");

        let long = "x".repeat(600);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_error_becomes_transport_failure() {
        let result: RequestResult = ApiError::invalid_header("X-Bad", "invalid value").into();
        assert_eq!(result.status, 0);
        assert_eq!(result.error.as_deref(), Some("Invalid header X-Bad: invalid value"));
    }
}
