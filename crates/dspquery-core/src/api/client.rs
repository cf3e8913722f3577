//! API client for the DSP backend.
//!
//! `ApiClient::request` performs one JSON request with the current bearer
//! token attached and folds every outcome, including transport failures,
//! into a `RequestResult`.

use anyhow::{Context, Result};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::SessionObserver;
use crate::config::Config;

use super::{ApiError, RequestOptions, RequestResult, ResponseData};

// ============================================================================
// Constants
// ============================================================================

pub const LOGIN_ENDPOINT: &str = "/login";
pub const SIGNUP_ENDPOINT: &str = "/signup";
pub const QUERY_ENDPOINT: &str = "/dsp/query";

const JSON_CONTENT_TYPE: &str = "application/json";

/// API client for the DSP backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionObserver,
}

impl ApiClient {
    /// Create a client for the configured base address.
    /// The token is read from `session` on every request.
    pub fn new(config: &Config, session: SessionObserver) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            session,
        })
    }

    /// Create a client for an explicit backend address
    pub fn with_base_url(base_url: impl Into<String>, session: SessionObserver) -> Result<Self> {
        let config = Config {
            backend_url: Some(base_url.into()),
            ..Config::default()
        };
        Self::new(&config, session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionObserver {
        &self.session
    }

    /// Perform one request against `base_url + path`.
    pub async fn request(&self, path: &str, options: RequestOptions) -> RequestResult {
        let url = format!("{}{}", self.base_url, path);
        let method = options.method.clone().unwrap_or(Method::GET);
        debug!(%method, url = %url, "Sending request");

        match self.execute(&url, method, options).await {
            Ok(result) => {
                debug!(url = %url, status = result.status, ok = result.ok, "Request completed");
                result
            }
            Err(e) => {
                warn!(url = %url, error = %e, "No response received");
                e.into()
            }
        }
    }

    async fn execute(
        &self,
        url: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<RequestResult, ApiError> {
        let headers = self.build_headers(&options.headers)?;
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = options.body.as_ref().filter(|body| !body.is_null()) {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |content_type| content_type.contains(JSON_CONTENT_TYPE));
        let text = response.text().await?;
        let data = decode_payload(text, is_json);

        if status.is_success() {
            Ok(RequestResult::success(status.as_u16(), data))
        } else {
            if let ResponseData::Text(ref body) = data {
                debug!(status = status.as_u16(), body = %ApiError::truncate_body(body), "Request rejected");
            }
            Ok(RequestResult::failure(status.as_u16(), data))
        }
    }

    /// JSON content type, then caller headers, then the bearer token.
    fn build_headers(&self, extra: &[(String, String)]) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        for (name, value) in extra {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::invalid_header(name, e))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ApiError::invalid_header(name, e))?;
            headers.insert(header_name, header_value);
        }

        if let Some(token) = self.session.token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::invalid_header(header::AUTHORIZATION.as_str(), e))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    // ===== Backend Endpoints =====

    /// `POST /login`
    pub async fn login(&self, email: &str, password: &str) -> RequestResult {
        let body = json!({ "email": email, "password": password });
        self.request(LOGIN_ENDPOINT, RequestOptions::post(body)).await
    }

    /// `POST /signup`
    pub async fn signup(&self, email: &str, password: &str, name: &str) -> RequestResult {
        let body = json!({ "email": email, "password": password, "name": name });
        self.request(SIGNUP_ENDPOINT, RequestOptions::post(body)).await
    }

    /// `POST /dsp/query`
    pub async fn query(&self, prompt: &str) -> RequestResult {
        let body = json!({ "prompt": prompt });
        self.request(QUERY_ENDPOINT, RequestOptions::post(body)).await
    }
}

/// JSON when declared as such and parseable, raw text otherwise.
fn decode_payload(text: String, is_json: bool) -> ResponseData {
    if !is_json {
        return ResponseData::Text(text);
    }
    match serde_json::from_str(&text) {
        Ok(value) => ResponseData::Json(value),
        Err(e) => {
            warn!(error = %e, body = %ApiError::truncate_body(&text), "Response declared JSON but did not parse");
            ResponseData::Text(text)
        }
    }
}
