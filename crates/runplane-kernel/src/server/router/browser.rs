use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use runplane_core_types::Platform;

use crate::auth::{Caller, BROWSER_TOKEN_QUERY};
use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::server::ServeState;
use crate::worker::strip_query_param;

pub(super) fn router() -> Router<ServeState> {
    Router::new()
        .route("/api/browser/token", post(issue_token_handler))
        .route("/api/browser/proxy/*path", any(proxy_handler))
        .route("/api/browser/sessions", get(list_sessions_handler))
        .route(
            "/api/browser/sessions/:platform",
            delete(disconnect_session_handler),
        )
        .route(
            "/api/browser/sessions/:platform/connect",
            post(connect_session_handler),
        )
        .route(
            "/api/browser/sessions/:platform/restore",
            post(restore_session_handler),
        )
}

/// Gate first, then identity: a disabled platform rejects even valid tokens.
async fn browser_caller(state: &ServeState, headers: &HeaderMap, uri: &Uri) -> ControlPlaneResult<Caller> {
    state.plane.worker().ensure_enabled()?;
    state.plane.resolve_caller(headers, uri).await
}

fn parse_platform(raw: &str) -> ControlPlaneResult<Platform> {
    Platform::parse(raw).map_err(|err| ControlPlaneError::invalid(err.to_string()))
}

#[instrument(name = "runplane.browser.token", skip_all)]
async fn issue_token_handler(
    State(state): State<ServeState>,
    headers: HeaderMap,
) -> ControlPlaneResult<Json<Value>> {
    state.plane.worker().ensure_enabled()?;
    let caller = state.plane.resolve_full_caller(&headers).await?;
    let issued = state.plane.tokens().issue(&caller.owner);
    debug!(owner = %caller.owner, expires_at = %issued.expires_at, "proxy token issued");
    Ok(Json(json!({
        "success": true,
        "token": issued.token,
        "expires_at": issued.expires_at,
    })))
}

#[instrument(name = "runplane.browser.proxy", skip_all, fields(path = %path))]
async fn proxy_handler(
    State(state): State<ServeState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> ControlPlaneResult<Response> {
    let caller = browser_caller(&state, &headers, &uri).await?;
    let worker = state.plane.worker();
    let path = format!("/{}", path.trim_start_matches('/'));
    let query = strip_query_param(uri.query(), BROWSER_TOKEN_QUERY);

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    if worker.is_stream_path(&path) {
        let upstream = worker
            .open_stream(
                &caller.owner,
                method,
                &path,
                query.as_deref(),
                body,
                content_type,
            )
            .await?;
        let status = upstream.status();
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-transform"),
        );
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        return Ok(response);
    }

    let reply = worker
        .forward(
            &caller.owner,
            method,
            &path,
            query.as_deref(),
            body,
            content_type,
        )
        .await?;
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    let content_type = reply
        .content_type
        .as_deref()
        .and_then(|raw| HeaderValue::from_str(raw).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}

#[instrument(name = "runplane.browser.sessions.list", skip_all)]
async fn list_sessions_handler(
    State(state): State<ServeState>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Json<Value>> {
    let caller = browser_caller(&state, &headers, &uri).await?;
    let sessions = state.plane.worker().list_sessions(&caller.owner).await?;
    Ok(Json(json!({ "success": true, "sessions": sessions })))
}

#[instrument(name = "runplane.browser.sessions.connect", skip_all, fields(platform = %platform))]
async fn connect_session_handler(
    State(state): State<ServeState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Json<Value>> {
    let caller = browser_caller(&state, &headers, &uri).await?;
    let platform = parse_platform(&platform)?;
    let session = state
        .plane
        .worker()
        .connect_session(&caller.owner, &platform)
        .await?;
    Ok(Json(json!({ "success": true, "session": session })))
}

#[instrument(name = "runplane.browser.sessions.restore", skip_all, fields(platform = %platform))]
async fn restore_session_handler(
    State(state): State<ServeState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Json<Value>> {
    let caller = browser_caller(&state, &headers, &uri).await?;
    let platform = parse_platform(&platform)?;
    let session = state
        .plane
        .worker()
        .restore_session(&caller.owner, &platform)
        .await?;
    Ok(Json(json!({ "success": true, "session": session })))
}

#[instrument(name = "runplane.browser.sessions.disconnect", skip_all, fields(platform = %platform))]
async fn disconnect_session_handler(
    State(state): State<ServeState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Response> {
    let caller = browser_caller(&state, &headers, &uri).await?;
    let platform = parse_platform(&platform)?;
    state
        .plane
        .worker()
        .disconnect_session(&caller.owner, &platform)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "success": true }))).into_response())
}
