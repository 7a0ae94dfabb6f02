//! Shared setup for server integration tests.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use confer_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use confer_server::config::MessagingConfig;
use confer_server::session::HmacSessionVerifier;
use confer_server::{app, AppState};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const SECRET: [u8; 32] = [42u8; 32];

pub struct TestServer {
    pub state: AppState,
    pub pool: DbPool,
    pub app: Router,
    _dir: tempfile::TempDir,
}

pub fn setup() -> TestServer {
    setup_with(MessagingConfig::default())
}

pub fn setup_with(messaging: MessagingConfig) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("confer.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();

    let state = AppState::new(
        pool.clone(),
        Arc::new(HmacSessionVerifier::new(SECRET)),
        messaging,
    );
    TestServer {
        app: app(state.clone()),
        state,
        pool,
        _dir: dir,
    }
}

pub fn token(user_id: &str) -> String {
    HmacSessionVerifier::new(SECRET).issue(user_id, 300)
}

pub fn expired_token(user_id: &str) -> String {
    HmacSessionVerifier::new(SECRET).issue_until(user_id, 1)
}

/// Sends one request through the router and returns status and JSON body
/// (`Value::Null` for an empty body).
pub async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("authorization", format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Binds the app on an ephemeral port with connect info, as `main` does.
pub async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Polls `cond` until it holds or five seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}
