//! Application flows built on the session and API layers.
//!
//! `App` wires the configured store, session observer, API client and
//! access guard together and implements the login, signup and query
//! flows a front end drives.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, RequestResult, ResponseData};
use crate::auth::{AccessDecision, AccessGuard, CredentialStore, SessionObserver, SessionState};
use crate::config::{origin_slug, Config, StorageBackend, APP_NAME};
use crate::storage::{FileStore, KeyValueStore, KeyringStore, OriginStorage};

/// Shown when a successful login/signup response carries no token
pub const INVALID_RESPONSE: &str = "Invalid response from server";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from server")]
    InvalidResponse,
}

impl FlowError {
    fn rejected(result: &RequestResult, fallback: &str) -> Self {
        FlowError::Rejected {
            status: result.status,
            message: result
                .error
                .clone()
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| fallback.to_string()),
        }
    }
}

pub struct App {
    config: Config,
    session: SessionObserver,
    api: ApiClient,
    guard: AccessGuard,
}

impl App {
    /// Build the application over an explicit store
    pub fn new(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let session = SessionObserver::new(CredentialStore::new(store));
        let api = ApiClient::new(&config, session.clone())?;
        let guard = AccessGuard::new(session.clone());
        debug!(base_url = api.base_url(), "App initialized");

        Ok(Self {
            config,
            session,
            api,
            guard,
        })
    }

    /// Build the application over the store selected in `config`
    pub fn from_config(config: Config) -> Result<Self> {
        let store = open_store(&config)?;
        Self::new(config, store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &SessionObserver {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn state(&self) -> SessionState {
        self.session.current_state()
    }

    /// Where `path` resolves for the current session
    pub fn resolve(&self, path: &str) -> AccessDecision {
        self.guard.resolve(path)
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    pub async fn attempt_login(&self, email: &str, password: &str) -> Result<(), FlowError> {
        require("Email", email)?;
        require("Password", password)?;

        let result = self.api.login(email.trim(), password).await;
        self.accept_token(result, "Login failed")?;
        info!("Login successful");
        Ok(())
    }

    pub async fn attempt_signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), FlowError> {
        require("Name", name)?;
        require("Email", email)?;
        require("Password", password)?;

        let result = self.api.signup(email.trim(), password, name.trim()).await;
        self.accept_token(result, "Signup failed")?;
        info!("Signup successful");
        Ok(())
    }

    /// Store the token from a login/signup result.
    /// The session is untouched unless a token is present.
    fn accept_token(&self, result: RequestResult, failure: &str) -> Result<(), FlowError> {
        if !result.ok {
            warn!(status = result.status, "Authentication rejected");
            return Err(FlowError::rejected(&result, failure));
        }

        let token = extract_token(&result).ok_or_else(|| {
            warn!("Authentication response carried no token");
            FlowError::InvalidResponse
        })?;
        self.session.set_credential(token);
        Ok(())
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Submit a natural-language prompt and return the display text.
    pub async fn run_query(&self, prompt: &str) -> Result<String, FlowError> {
        if prompt.trim().is_empty() {
            return Err(FlowError::EmptyPrompt);
        }

        let result = self.api.query(prompt).await;
        if !result.ok {
            return Err(FlowError::rejected(&result, "Query failed"));
        }
        Ok(result.data.as_ref().map(display_text).unwrap_or_default())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), FlowError> {
    if value.trim().is_empty() {
        Err(FlowError::MissingField(field))
    } else {
        Ok(())
    }
}

/// `token`, else `access_token`; empty strings do not count.
pub fn extract_token(result: &RequestResult) -> Option<&str> {
    result
        .str_field("token")
        .or_else(|| result.str_field("access_token"))
}

/// Text shown for a query result: a raw string as-is, a truthy `result`
/// field, or the whole payload pretty-printed.
pub fn display_text(data: &ResponseData) -> String {
    match data {
        ResponseData::Text(text) => text.clone(),
        ResponseData::Json(Value::String(text)) => text.clone(),
        ResponseData::Json(value) => match value.get("result") {
            Some(Value::String(text)) if !text.is_empty() => text.clone(),
            Some(result) if is_truthy(result) => pretty(result),
            _ => pretty(value),
        },
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Open the store selected by `config.storage`
pub fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.storage {
        StorageBackend::File => Arc::new(FileStore::open(config.storage_dir()?)),
        StorageBackend::Keyring => Arc::new(KeyringStore::new(format!(
            "{}-{}",
            APP_NAME,
            origin_slug(&config.origin)
        ))),
        StorageBackend::Memory => Arc::new(OriginStorage::new().open_context()),
    };
    debug!(backend = ?config.storage, "Storage opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn app_for(server: &MockServer) -> App {
        let config = Config {
            backend_url: Some(server.uri()),
            ..Config::default()
        };
        App::new(config, Arc::new(OriginStorage::new().open_context())).unwrap()
    }

    fn ok_json(value: Value) -> RequestResult {
        RequestResult::success(200, ResponseData::Json(value))
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(&ok_json(json!({"token": "T1"}))), Some("T1"));
        assert_eq!(extract_token(&ok_json(json!({"access_token": "T2"}))), Some("T2"));
        assert_eq!(
            extract_token(&ok_json(json!({"token": "", "access_token": "T2"}))),
            Some("T2")
        );
        assert_eq!(extract_token(&ok_json(json!({"user": "ada"}))), None);
        assert_eq!(
            extract_token(&RequestResult::success(200, ResponseData::Text("T1".into()))),
            None
        );
    }

    #[test]
    fn test_display_text() {
        assert_eq!(display_text(&ResponseData::Text("plain".into())), "plain");
        assert_eq!(display_text(&ResponseData::Json(json!("quoted"))), "quoted");
        assert_eq!(display_text(&ResponseData::Json(json!({"result": "42"}))), "42");
        assert_eq!(
            display_text(&ResponseData::Json(json!({"result": {"rows": 2}}))),
            "{\n  \"rows\": 2\n}"
        );
        assert_eq!(
            display_text(&ResponseData::Json(json!({"result": ""}))),
            "{\n  \"result\": \"\"\n}"
        );
        assert_eq!(display_text(&ResponseData::Json(json!([1, 2]))), "[\n  1,\n  2\n]");
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(1.5)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(json!({"email": "ada@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "T1"})))
            .mount(&server)
            .await;

        let app = app_for(&server);
        assert_eq!(app.resolve("/prompt"), AccessDecision::RedirectToLogin);

        app.attempt_login(" ada@example.com ", "pw").await.unwrap();

        assert!(app.state().is_authenticated);
        assert_eq!(app.state().token.as_deref(), Some("T1"));
        assert_eq!(app.resolve("/prompt"), AccessDecision::Allow);
        assert_eq!(app.resolve("/login"), AccessDecision::RedirectToApp);
    }

    #[tokio::test]
    async fn test_signup_accepts_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T2"})))
            .mount(&server)
            .await;

        let app = app_for(&server);
        app.attempt_signup("Ada", "ada@example.com", "pw").await.unwrap();
        assert_eq!(app.state().token.as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_rejected_login_leaves_session_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "bad credentials"})))
            .mount(&server)
            .await;

        let app = app_for(&server);
        let err = app.attempt_login("ada@example.com", "wrong").await.unwrap_err();
        assert_eq!(
            err,
            FlowError::Rejected {
                status: 401,
                message: "bad credentials".to_string()
            }
        );
        assert!(!app.state().is_authenticated);
    }

    #[tokio::test]
    async fn test_missing_token_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": "ada"})))
            .mount(&server)
            .await;

        let app = app_for(&server);
        app.session().set_credential("existing");

        let err = app.attempt_login("ada@example.com", "pw").await.unwrap_err();
        assert_eq!(err, FlowError::InvalidResponse);
        assert_eq!(err.to_string(), INVALID_RESPONSE);
        assert_eq!(app.state().token.as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn test_required_fields_checked_before_request() {
        let server = MockServer::start().await;
        let app = app_for(&server);

        assert_eq!(
            app.attempt_login("", "pw").await.unwrap_err(),
            FlowError::MissingField("Email")
        );
        assert_eq!(
            app.attempt_signup("Ada", "ada@example.com", " ").await.unwrap_err(),
            FlowError::MissingField("Password")
        );
        assert_eq!(app.run_query("   ").await.unwrap_err(), FlowError::EmptyPrompt);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_sends_bearer_and_renders_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dsp/query"))
            .and(header("authorization", "Bearer T1"))
            .and(body_json(json!({"prompt": "count users"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "12 users"})))
            .mount(&server)
            .await;

        let app = app_for(&server);
        app.session().set_credential("T1");
        assert_eq!(app.run_query("count users").await.unwrap(), "12 users");
    }

    #[tokio::test]
    async fn test_query_failure_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dsp/query"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Not authenticated"})))
            .mount(&server)
            .await;

        let app = app_for(&server);
        let err = app.run_query("count users").await.unwrap_err();
        assert_eq!(err.to_string(), "Not authenticated");
    }

    #[tokio::test]
    async fn test_logout_redirects_protected_route() {
        let server = MockServer::start().await;
        let app = app_for(&server);
        app.session().set_credential("T1");
        assert_eq!(app.resolve("/prompt"), AccessDecision::Allow);

        app.logout();
        assert_eq!(app.resolve("/prompt"), AccessDecision::RedirectToLogin);
        assert_eq!(app.guard().final_destination("/"), "/login");
    }

    #[test]
    fn test_memory_backend_from_config() {
        let config = Config {
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        let app = App::from_config(config).unwrap();
        assert!(!app.state().is_authenticated);
        app.session().set_credential("T1");
        assert!(app.state().is_authenticated);
    }
}
