//! HTTP route handlers.
//!
//! Handlers are thin: each one validates its extractors, calls a single
//! [`Coordinator`] method, and serializes the result. `RelayError` already
//! implements `IntoResponse`, so a handler's `Result<Json<T>, RelayError>`
//! return type maps every failure to the right HTTP status without a
//! separate error-translation layer.

use std::pin::Pin;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::SERVICE_ID;

/// Builds the full router: health/readiness probes, the 13-command queue
/// surface, and the live audio stream.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stream/{identifier}", get(stream_audio))
        .route("/api/stream/start", post(start_stream))
        .route("/api/stream/stop", post(stop_stream))
        .route("/api/stream/status", get(status))
        .route("/api/capture/{identifier}/ready", get(capture_ready))
        .route("/api/queue", get(list_queue))
        .route("/api/queue", post(enqueue_item))
        .route("/api/queue", delete(clear_queue))
        .route("/api/queue/{entry_id}", delete(remove_entry))
        .route("/api/queue/reorder", post(reorder_queue))
        .route("/api/queue/next", post(next))
        .route("/api/history", get(list_history))
        .route("/api/history", delete(clear_history))
        .route("/api/jobs/{identifier}", get(job_status))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "service": SERVICE_ID, "status": "ok" }))
}

async fn readiness_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ready": true, "status": state.coordinator.status() }))
}

#[derive(Debug, Deserialize)]
struct StartStreamRequest {
    identifier: String,
    #[serde(default)]
    skip_post_processing: bool,
}

async fn start_stream(
    State(state): State<AppState>,
    Json(req): Json<StartStreamRequest>,
) -> RelayResult<Json<crate::coordinator::StartStreamResult>> {
    let result = state
        .coordinator
        .start_stream(&req.identifier, req.skip_post_processing)
        .await?;
    Ok(Json(result))
}

async fn stop_stream(State(state): State<AppState>) -> impl IntoResponse {
    state.coordinator.stop_stream().await;
    StatusCode::NO_CONTENT
}

async fn status(State(state): State<AppState>) -> Json<crate::coordinator::StreamStatus> {
    Json(state.coordinator.status())
}

async fn capture_ready(State(state): State<AppState>, Path(identifier): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "ready": state.coordinator.capture_ready(&identifier) }))
}

/// Audio byte stream for the active ingest session. 404s if nothing is
/// currently streaming, or if `identifier` doesn't match the active one —
/// relaycast only ever has one live producer at a time.
async fn stream_audio(State(state): State<AppState>, Path(identifier): Path<String>) -> RelayResult<Response> {
    match state.coordinator.status() {
        crate::coordinator::StreamStatus::Streaming { identifier: active, .. } if active == identifier => {}
        _ => return Err(RelayError::StreamNotFound(identifier)),
    }

    let mut subscription = state.coordinator.subscribe_stream()?;
    let body_stream: Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>> = Box::pin(stream! {
        while let Some(chunk) = subscription.next().await {
            yield Ok(chunk);
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .map_err(|e| RelayError::Internal(format!("build stream response: {e}")))?)
}

#[derive(Debug, Deserialize)]
struct EnqueueItemRequest {
    identifier: String,
    #[serde(default)]
    skip_post_processing: bool,
}

async fn enqueue_item(
    State(state): State<AppState>,
    Json(req): Json<EnqueueItemRequest>,
) -> RelayResult<Json<crate::coordinator::EnqueueItemResult>> {
    let result = state
        .coordinator
        .enqueue_item(&req.identifier, req.skip_post_processing)
        .await?;
    Ok(Json(result))
}

async fn list_queue(State(state): State<AppState>) -> RelayResult<Json<Vec<crate::store::QueueEntry>>> {
    Ok(Json(state.coordinator.list_queue().await?))
}

async fn remove_entry(State(state): State<AppState>, Path(entry_id): Path<i64>) -> RelayResult<StatusCode> {
    state.coordinator.remove_entry(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ReorderQueueRequest {
    ordered_entry_ids: Vec<i64>,
}

async fn reorder_queue(
    State(state): State<AppState>,
    Json(req): Json<ReorderQueueRequest>,
) -> RelayResult<StatusCode> {
    state.coordinator.reorder_queue(&req.ordered_entry_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn next(State(state): State<AppState>) -> RelayResult<Json<crate::coordinator::NextResult>> {
    Ok(Json(state.coordinator.next().await?))
}

async fn clear_queue(State(state): State<AppState>) -> RelayResult<StatusCode> {
    state.coordinator.clear_queue().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ListHistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

async fn list_history(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<ListHistoryQuery>,
) -> RelayResult<Json<Vec<crate::store::HistoryEntry>>> {
    Ok(Json(state.coordinator.list_history(query.limit).await?))
}

async fn clear_history(State(state): State<AppState>) -> RelayResult<StatusCode> {
    state.coordinator.clear_history().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn job_status(State(state): State<AppState>, Path(identifier): Path<String>) -> Response {
    match state.coordinator.job_status(&identifier) {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
