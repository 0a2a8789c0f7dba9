//! In-process fake AccessGate backend and frontend

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;

use accessgate_common::{EventSink, SystemClock};

#[derive(Default)]
pub struct Backend {
    accounts: Mutex<HashMap<String, String>>,
    pub issued: AtomicUsize,
    pub users_requests: AtomicUsize,
    pub forbid_users: AtomicBool,
    pub omit_uptime: AtomicBool,
    /// `/health` never answers while set
    pub stall_health: AtomicBool,
    /// Signalled when a stalled health request arrives
    pub stalled: Notify,
}

impl Backend {
    fn issue_token(&self) -> String {
        format!("token-{}", self.issued.fetch_add(1, Ordering::SeqCst))
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn health(State(backend): State<Arc<Backend>>) -> Json<Value> {
    if backend.stall_health.load(Ordering::SeqCst) {
        backend.stalled.notify_one();
        std::future::pending::<()>().await;
    }
    if backend.omit_uptime.load(Ordering::SeqCst) {
        Json(json!({"status": "ok"}))
    } else {
        Json(json!({"status": "ok", "uptime": 123.5}))
    }
}

async fn register(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default().to_string();
    if body["firstName"].as_str().is_none() || body["lastName"].as_str().is_none() {
        return error(StatusCode::BAD_REQUEST, "missing name");
    }

    let mut accounts = backend.accounts.lock().unwrap();
    if accounts.contains_key(&email) {
        return error(StatusCode::CONFLICT, "User already exists");
    }
    accounts.insert(email.clone(), password);

    (
        StatusCode::CREATED,
        Json(json!({"user": {"email": email}, "accessToken": backend.issue_token()})),
    )
        .into_response()
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    let known = backend.accounts.lock().unwrap().get(email).cloned();
    match known {
        Some(expected) if expected == password => (
            StatusCode::OK,
            Json(json!({"accessToken": backend.issue_token(), "refreshToken": "r"})),
        )
            .into_response(),
        _ => error(StatusCode::UNAUTHORIZED, "Invalid credentials"),
    }
}

async fn users(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.users_requests.fetch_add(1, Ordering::SeqCst);

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer token-"))
        .unwrap_or(false);
    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "Access token required");
    }
    if backend.forbid_users.load(Ordering::SeqCst) {
        return error(StatusCode::FORBIDDEN, "Insufficient permissions");
    }

    let emails: Vec<Value> = backend
        .accounts
        .lock()
        .unwrap()
        .keys()
        .map(|email| json!({"email": email}))
        .collect();
    (StatusCode::OK, Json(json!({"users": emails}))).into_response()
}

async fn frontend() -> Html<&'static str> {
    Html("<html><head><title>AccessGate</title></head><body><h1>AccessGate RBAC</h1></body></html>")
}

pub async fn spawn_backend() -> (Arc<Backend>, SocketAddr) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/", get(frontend))
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/users", get(users))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, addr)
}

/// Sink writing to `name` under `dir`, without stdout mirroring
pub fn sink(dir: &tempfile::TempDir, name: &str) -> EventSink {
    EventSink::open_with(dir.path().join(name), Arc::new(SystemClock), false).unwrap()
}

pub fn events(sink: &EventSink) -> Vec<Value> {
    std::fs::read_to_string(sink.path())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

/// Stand-in kubectl: every command succeeds, the namespace has no pods, and
/// port-forwards run until signalled.
const KUBECTL_SHIM: &str = r#"#!/bin/sh
case "$1" in
  get) echo '{"apiVersion": "v1", "kind": "List", "items": []}' ;;
  port-forward) exec sleep 30 ;;
esac
exit 0
"#;

#[cfg(unix)]
pub fn kubectl_shim(dir: &tempfile::TempDir) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("kubectl");
    std::fs::write(&path, KUBECTL_SHIM).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // a process forked concurrently may still hold the write handle for a moment
    let busy = nix::errno::Errno::ETXTBSY as i32;
    for _ in 0..50 {
        match std::process::Command::new(&path).arg("version").output() {
            Ok(_) => return path,
            Err(e) if e.raw_os_error() == Some(busy) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("cannot run {}: {}", path.display(), e),
        }
    }
    panic!("{} stayed busy", path.display());
}
