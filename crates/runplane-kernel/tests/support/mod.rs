#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use runplane_kernel::llm::ModelProvider;
use runplane_kernel::{build_router, Config, ControlPlane, ServeState};

pub const ALICE: &str = "api-alice";
pub const BOB: &str = "api-bob";
pub const WORKER_SECRET: &str = "worker-secret";

/// What the fake worker saw and what it will answer with.
#[derive(Default)]
pub struct FakeWorker {
    pub restored: Mutex<Vec<Value>>,
    pub tasks: Mutex<Vec<Value>>,
    pub cookies: Mutex<Vec<Value>>,
    pub auth_headers: Mutex<Vec<(String, String)>>,
}

impl FakeWorker {
    fn record_auth(&self, headers: &HeaderMap) {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let owner = headers
            .get("x-runplane-owner")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth_headers.lock().push((bearer, owner));
    }
}

pub async fn spawn_fake_worker() -> (String, Arc<FakeWorker>) {
    let worker = Arc::new(FakeWorker::default());
    let app = Router::new()
        .route("/session/restore", post(restore))
        .route("/session/state", get(session_state))
        .route("/tasks", post(task))
        .route("/echo", get(echo).post(echo))
        .route("/slow", get(slow))
        .route("/teapot", post(teapot))
        .route("/live/stream", get(live_stream))
        .route("/feed/stream", post(feed_stream))
        .with_state(Arc::clone(&worker));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake worker");
    let addr = listener.local_addr().expect("fake worker addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), worker)
}

async fn restore(
    State(worker): State<Arc<FakeWorker>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    worker.record_auth(&headers);
    worker.restored.lock().push(body);
    Json(json!({ "success": true }))
}

async fn session_state(
    State(worker): State<Arc<FakeWorker>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    worker.record_auth(&headers);
    Json(json!({
        "cookies": worker.cookies.lock().clone(),
        "origins": [],
        "platform": query.get("platform"),
    }))
}

async fn task(
    State(worker): State<Arc<FakeWorker>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    worker.record_auth(&headers);
    let instruction = body["instruction"].clone();
    worker.tasks.lock().push(body);
    Json(json!({ "status": "done", "instruction": instruction }))
}

async fn echo(
    State(worker): State<Arc<FakeWorker>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Json<Value> {
    worker.record_auth(&headers);
    Json(json!({ "query": query, "body": body }))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn teapot() -> impl IntoResponse {
    (StatusCode::IM_A_TEAPOT, Json(json!({ "error": "short and stout" })))
}

async fn live_stream() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        "data: one\n\ndata: two\n\n",
    )
}

async fn feed_stream(
    State(worker): State<Arc<FakeWorker>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    worker.record_auth(&headers);
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        format!("data: {body}\n\n"),
    )
}

pub fn config(worker_url: Option<&str>) -> Config {
    let mut config = Config::default();
    config
        .auth
        .api_tokens
        .insert(ALICE.to_string(), "alice".to_string());
    config
        .auth
        .api_tokens
        .insert(BOB.to_string(), "bob".to_string());
    config.worker.enabled = worker_url.is_some();
    config.worker.base_url = worker_url.map(str::to_string);
    config.worker.secret = Some(WORKER_SECRET.to_string());
    config.worker.request_timeout_secs = 1;
    config.vault.secret = Some("vault-secret".to_string());
    config.runs.poll_interval_ms = 10;
    config
}

pub fn plane(config: Config, provider: Option<Arc<dyn ModelProvider>>) -> Arc<ControlPlane> {
    let mut builder = ControlPlane::builder(config);
    if let Some(provider) = provider {
        builder = builder.provider(provider);
    }
    Arc::new(builder.build().expect("control plane"))
}

pub fn app(plane: Arc<ControlPlane>) -> Router {
    build_router(ServeState::new(plane))
}

pub fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

pub async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send_raw(app, request).await;
    let value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    (status, value)
}

/// `(event, data)` pairs of an SSE body, ignoring comments and keep-alives.
pub fn sse_frames(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = serde_json::from_str(rest.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}
