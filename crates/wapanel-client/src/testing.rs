//! In-process fake backend for tests.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use wapanel_core::config::DiscoveryConfig;

#[derive(Default)]
pub(crate) struct Hits {
    pub health: AtomicUsize,
    pub api: AtomicUsize,
    pub pause: AtomicUsize,
    pub resume: AtomicUsize,
    pub cancel: AtomicUsize,
    pub slow: AtomicUsize,
}

impl Hits {
    pub fn health(&self) -> usize {
        self.health.load(Ordering::SeqCst)
    }

    pub fn api(&self) -> usize {
        self.api.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeBackend {
    pub port: u16,
    pub hits: Arc<Hits>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
struct AppState {
    hits: Arc<Hits>,
    healthy: bool,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    state.hits.health.fetch_add(1, Ordering::SeqCst);
    if state.healthy {
        Json(json!({"status": "ok", "sessions": 0}))
    } else {
        Json(json!({"status": "starting"}))
    }
}

async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    let user = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({ "userId": user }))
}

async fn failing(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "session not ready"})),
    )
}

async fn bulk_command(State(state): State<AppState>, Path(action): Path<String>) -> Json<Value> {
    let counter = match action.as_str() {
        "pause" => &state.hits.pause,
        "resume" => &state.hits.resume,
        _ => &state.hits.cancel,
    };
    counter.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true}))
}

async fn sessions(State(state): State<AppState>) -> Json<Value> {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    Json(json!([
        {"id": "main", "name": "Main phone", "status": "ready", "phone": "5511999990000"},
        {"id": "backup", "status": "qr"}
    ]))
}

async fn create_session(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true, "session": {"id": body["sessionId"], "status": "initializing"}}))
}

async fn destroy_session(State(state): State<AppState>, Path(_id): Path<String>) -> StatusCode {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn echo(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true, "received": body}))
}

async fn login(State(state): State<AppState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    if body["password"] == "secret" {
        (
            StatusCode::OK,
            Json(json!({"success": true, "user": {"id": 42, "username": body["username"], "role": "admin"}})),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "invalid credentials"})),
        )
    }
}

/// Accepts the request, then answers too late for a short client timeout.
async fn slow(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    state.hits.slow.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;
    Json(json!({"success": true, "received": body}))
}

async fn listing(State(state): State<AppState>) -> Json<Value> {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    Json(json!([{"id": 1, "enabled": true}]))
}

async fn remote_config(State(state): State<AppState>) -> Json<Value> {
    state.hits.api.fetch_add(1, Ordering::SeqCst);
    Json(json!({"maxSessions": 3, "bulkDelayMinutes": 1}))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(health))
        .route("/api/whoami", get(whoami))
        .route("/api/fail", get(failing))
        .route("/api/messages/bulk/{action}", post(bulk_command))
        .route("/api/messages/send", post(echo))
        .route("/api/messages/bulk", post(echo))
        .route("/api/sessions", get(sessions).post(create_session))
        .route("/api/sessions/{id}", delete(destroy_session))
        .route("/api/auth/login", post(login))
        .route("/api/scheduled", get(listing))
        .route("/api/auto-reply", get(listing))
        .route("/api/config", get(remote_config))
        .route("/api/slow", post(slow))
        .with_state(state)
}

async fn spawn(healthy: bool) -> FakeBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(Hits::default());
    let app = router(AppState {
        hits: Arc::clone(&hits),
        healthy,
    });
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    FakeBackend { port, hits, task }
}

/// Healthy backend on an ephemeral port.
pub(crate) async fn spawn_backend() -> FakeBackend {
    spawn(true).await
}

/// Backend that answers HTTP but reports itself as not ready.
pub(crate) async fn spawn_unhealthy_backend() -> FakeBackend {
    spawn(false).await
}

/// A port nothing is listening on.
pub(crate) async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Discovery settings that only scan the given ports, once, quickly.
pub(crate) fn discovery_config(ports: &[u16]) -> DiscoveryConfig {
    DiscoveryConfig {
        port_info: String::new(),
        base_port: ports.first().copied().unwrap_or(1),
        base_range: 0,
        window: 0,
        legacy_ranges: ports.iter().skip(1).map(|p| [*p, *p]).collect(),
        probe_timeout_ms: 500,
        max_rounds: 1,
        retry_delay_ms: 10,
        ..Default::default()
    }
}
