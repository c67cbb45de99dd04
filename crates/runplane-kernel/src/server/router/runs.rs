use std::convert::Infallible;

use async_stream::stream;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use runplane_core_types::RunId;
use runplane_event_store::{RunEvent, RunEventLog, StreamItem, TERMINAL_EVENT_ERROR};

use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::orchestrator::RunRequest;
use crate::server::ServeState;

pub(super) fn router() -> Router<ServeState> {
    Router::new()
        .route("/api/runs", post(create_run_handler))
        .route("/api/runs/:run_id", get(get_run_handler))
        .route("/api/runs/:run_id/events", get(run_events_handler))
        .route("/api/runs/:run_id/stream", get(run_stream_handler))
}

#[derive(Debug, Default, Deserialize)]
struct SinceQuery {
    since: Option<i64>,
}

#[instrument(name = "runplane.runs.create", skip_all)]
async fn create_run_handler(
    State(state): State<ServeState>,
    headers: HeaderMap,
    uri: Uri,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> ControlPlaneResult<Response> {
    let caller = state.plane.resolve_caller(&headers, &uri).await?;
    let Json(request) = payload.map_err(|err| ControlPlaneError::invalid(err.body_text()))?;
    let run_id = state
        .plane
        .orchestrator()
        .start_run(&caller.owner, request)
        .await?;
    info!(run_id = %run_id, owner = %caller.owner, "run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "run_id": run_id.as_str() })),
    )
        .into_response())
}

#[instrument(name = "runplane.runs.get", skip_all, fields(run_id = %run_id))]
async fn get_run_handler(
    State(state): State<ServeState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Json<Value>> {
    let caller = state.plane.resolve_caller(&headers, &uri).await?;
    let summary = state
        .plane
        .owned_run(&caller.owner, &RunId(run_id))
        .await?;
    Ok(Json(json!({
        "success": true,
        "run_id": summary.run_id.as_str(),
        "status": summary.status.as_str(),
        "event_count": summary.event_count,
        "created_at": summary.created_at,
        "finished_at": summary.finished_at,
    })))
}

#[instrument(name = "runplane.runs.events", skip_all, fields(run_id = %run_id))]
async fn run_events_handler(
    State(state): State<ServeState>,
    Path(run_id): Path<String>,
    query: Result<Query<SinceQuery>, QueryRejection>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Json<Value>> {
    let caller = state.plane.resolve_caller(&headers, &uri).await?;
    let query = since_query(query)?;
    let run_id = RunId(run_id);
    state.plane.owned_run(&caller.owner, &run_id).await?;
    let events = state
        .plane
        .log()
        .read_since(&run_id, query.since.unwrap_or(-1))
        .await?;
    let events: Vec<Value> = events.iter().map(RunEvent::to_wire).collect();
    Ok(Json(json!({ "success": true, "events": events })))
}

/// Resumable SSE view of a run.
///
/// The cursor is the last sequence the client saw: `?since=N` wins over the
/// `Last-Event-ID` header, and neither means the stream starts from the
/// first event.
#[instrument(name = "runplane.runs.stream", skip_all, fields(run_id = %run_id))]
async fn run_stream_handler(
    State(state): State<ServeState>,
    Path(run_id): Path<String>,
    query: Result<Query<SinceQuery>, QueryRejection>,
    headers: HeaderMap,
    uri: Uri,
) -> ControlPlaneResult<Response> {
    let caller = state.plane.resolve_caller(&headers, &uri).await?;
    let query = since_query(query)?;
    let run_id = RunId(run_id);
    state.plane.owned_run(&caller.owner, &run_id).await?;

    let header_cursor = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<i64>().ok());
    let cursor = query.since.or(header_cursor).unwrap_or(-1);

    let updates = state.plane.publisher().subscribe(run_id.clone(), cursor);
    let stream = stream! {
        let mut updates = Box::pin(updates);
        let mut saw_terminal = false;
        while let Some(item) = updates.next().await {
            match item {
                StreamItem::Event(event) => {
                    saw_terminal |= event.is_terminal();
                    yield Ok::<Event, Infallible>(sse_event(&event));
                }
                StreamItem::Closed { status } => {
                    if !saw_terminal {
                        let data = json!({ "type": status.terminal_event_type(), "status": status.as_str() });
                        yield Ok(Event::default().event(status.terminal_event_type()).data(data.to_string()));
                    }
                    break;
                }
                StreamItem::Failed { message } => {
                    warn!(run_id = %run_id, %message, "run stream terminated by read failure");
                    let data = json!({ "type": TERMINAL_EVENT_ERROR, "error": message, "reason": "stream_failed" });
                    yield Ok(Event::default().event(TERMINAL_EVENT_ERROR).data(data.to_string()));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.plane.config().runs.keep_alive())
                .text("keep-alive"),
        )
        .into_response())
}

fn since_query(
    query: Result<Query<SinceQuery>, QueryRejection>,
) -> ControlPlaneResult<SinceQuery> {
    query
        .map(|Query(query)| query)
        .map_err(|err| ControlPlaneError::invalid(err.body_text()))
}

fn sse_event(event: &RunEvent) -> Event {
    let data = serde_json::to_string(&event.to_wire()).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.sequence.to_string())
        .event(event.kind.as_str())
        .data(data)
}
