use std::sync::Arc;
use std::time::Duration;

use dspquery_core::{
    AccessDecision, App, Config, FileStore, FlowError, OriginStorage, SessionState,
};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

fn config_for(server: &MockServer) -> Config {
    Config {
        backend_url: Some(server.uri()),
        ..Config::default()
    }
}

async fn mock_login(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

async fn next_state(rx: &mut mpsc::UnboundedReceiver<SessionState>) -> SessionState {
    tokio::time::timeout(NOTIFY_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for session notification")
        .expect("listener channel closed")
}

#[tokio::test]
async fn login_in_one_tab_reaches_the_other() {
    let server = MockServer::start().await;
    mock_login(&server, 200, json!({"token": "T1"})).await;

    let origin = OriginStorage::new();
    let tab_a = App::new(config_for(&server), Arc::new(origin.open_context())).unwrap();
    let tab_b = App::new(config_for(&server), Arc::new(origin.open_context())).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = tab_b.session().subscribe(move |state| {
        let _ = tx.send(state.clone());
    });
    assert_eq!(tab_b.resolve("/prompt"), AccessDecision::RedirectToLogin);

    tab_a.attempt_login("ada@example.com", "pw").await.unwrap();
    assert!(tab_a.state().is_authenticated);

    let seen = next_state(&mut rx).await;
    assert!(seen.is_authenticated);
    assert_eq!(seen.token.as_deref(), Some("T1"));
    assert_eq!(tab_b.resolve("/prompt"), AccessDecision::Allow);

    tab_a.logout();

    let seen = next_state(&mut rx).await;
    assert!(!seen.is_authenticated);
    assert_eq!(tab_b.resolve("/prompt"), AccessDecision::RedirectToLogin);
}

#[tokio::test]
async fn rejected_login_changes_nothing_anywhere() {
    let server = MockServer::start().await;
    mock_login(&server, 401, json!({"detail": "bad credentials"})).await;

    let origin = OriginStorage::new();
    let tab_a = App::new(config_for(&server), Arc::new(origin.open_context())).unwrap();
    let tab_b = App::new(config_for(&server), Arc::new(origin.open_context())).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<SessionState>();
    let _subscription = tab_b.session().subscribe(move |state| {
        let _ = tx.send(state.clone());
    });

    let err = tab_a.attempt_login("ada@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.to_string(), "bad credentials");
    assert!(matches!(err, FlowError::Rejected { status: 401, .. }));

    let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(quiet.is_err());
    assert!(!tab_a.state().is_authenticated);
    assert!(!tab_b.state().is_authenticated);
}

#[tokio::test]
async fn file_storage_shares_session_between_instances() {
    let server = MockServer::start().await;
    mock_login(&server, 200, json!({"access_token": "T9"})).await;

    let dir = tempfile::tempdir().unwrap();
    let poll = Duration::from_millis(20);
    let first = App::new(
        config_for(&server),
        Arc::new(FileStore::with_poll_interval(dir.path(), poll)),
    )
    .unwrap();
    let second = App::new(
        config_for(&server),
        Arc::new(FileStore::with_poll_interval(dir.path(), poll)),
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = second.session().subscribe(move |state| {
        let _ = tx.send(state.clone());
    });

    first.attempt_login("ada@example.com", "pw").await.unwrap();
    let seen = next_state(&mut rx).await;
    assert_eq!(seen.token.as_deref(), Some("T9"));

    first.logout();
    let seen = next_state(&mut rx).await;
    assert_eq!(seen, SessionState::default());
}

#[tokio::test]
async fn unreachable_backend_reports_status_zero() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let config = Config {
        backend_url: Some(address),
        ..Config::default()
    };
    let app = App::new(config, Arc::new(OriginStorage::new().open_context())).unwrap();

    let result = app.api().login("ada@example.com", "pw").await;
    assert!(!result.ok);
    assert_eq!(result.status, 0);
    assert!(result.error.is_some_and(|e| !e.is_empty()));

    let err = app.attempt_login("ada@example.com", "pw").await.unwrap_err();
    assert!(matches!(err, FlowError::Rejected { status: 0, .. }));
    assert!(!app.state().is_authenticated);
}
