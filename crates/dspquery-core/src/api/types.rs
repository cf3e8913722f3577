//! Request options and the uniform request outcome.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error text used when a failed response carries no `detail`
pub const GENERIC_FAILURE: &str = "Request failed";

/// Response payload, decided by the declared content type.
///
/// Serializes untagged, as the bare payload. Deserializing cannot tell a
/// JSON string from text, so `Json(Value::String(..))` reads back as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ResponseData {
    Text(String),
    Json(Value),
}

impl ResponseData {
    /// Field of a JSON object payload
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            ResponseData::Json(Value::Object(map)) => map.get(name),
            _ => None,
        }
    }

    /// Non-empty string field of a JSON object payload
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Outcome of one request. Every failure mode is described here; the
/// request path never returns an error or panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RequestResult {
    pub ok: bool,
    /// HTTP status, or 0 when no response was received
    pub status: u16,
    /// `None` only when no response was received
    pub data: Option<ResponseData>,
    pub error: Option<String>,
}

impl RequestResult {
    pub fn success(status: u16, data: ResponseData) -> Self {
        Self {
            ok: true,
            status,
            data: Some(data),
            error: None,
        }
    }

    /// Non-2xx response; the error comes from the payload's `detail`.
    pub fn failure(status: u16, data: ResponseData) -> Self {
        let error = detail_message(&data).unwrap_or_else(|| GENERIC_FAILURE.to_string());
        Self {
            ok: false,
            status,
            data: Some(data),
            error: Some(error),
        }
    }

    /// No response was received.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ok: false,
            status: 0,
            data: None,
            error: Some(if message.is_empty() {
                "Network error".to_string()
            } else {
                message
            }),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.as_ref().and_then(|data| data.str_field(name))
    }
}

/// `detail` of an error payload: strings verbatim, other JSON serialized.
fn detail_message(data: &ResponseData) -> Option<String> {
    match data.field("detail")? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Options for `ApiClient::request`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Defaults to `GET`
    pub method: Option<Method>,
    /// Serialized as JSON when present
    pub body: Option<Value>,
    /// Merged over the defaults; caller values win
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Some(Method::POST),
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}
