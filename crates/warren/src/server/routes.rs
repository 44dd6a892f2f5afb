//! HTTP handlers of the dashboard API.

use std::{convert::Infallible, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use warren_core::{
    domain::{
        ActivityFilter, ActivityLogEntry, ActivityStats, ConflictFilter, ConflictInfo, SessionId,
    },
    metrics::SystemMetrics,
    sync::CommandError,
    Error, ErrorKind,
};

use super::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFoundError => StatusCode::NOT_FOUND,
        ErrorKind::ConflictError | ErrorKind::DependencyError => StatusCode::CONFLICT,
        ErrorKind::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ProcessError | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Core error rendered as `{"error": {kind, code, message}}`.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": CommandError::from(&self.0) }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Session of the caller: the `x-session-id` header, or a fresh `gui:` id.
fn session_of(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(
            || SessionId::gui(uuid::Uuid::new_v4()).as_str().to_string(),
            str::to_string,
        )
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// `POST /api/commands/:name`. The body is the parameter object; an empty
/// body means no parameters.
///
/// The response body is always the full command result. Its status follows
/// the error kind when the command failed.
pub async fn execute_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let params: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Error::validation(format!("request body is not JSON: {e}")))?
    };
    let session = session_of(&headers);
    let bridge = state.bridge;
    let result = state
        .commands
        .spawn(async move { bridge.execute_command(&name, params, &session).await })
        .await
        .map_err(|e| Error::io(format!("command task failed: {e}")))??;

    let status = result
        .error
        .as_ref()
        .map_or(StatusCode::OK, |e| status_for(e.kind));
    Ok((status, Json(result)).into_response())
}

pub async fn activity(
    State(state): State<AppState>,
    Query(filter): Query<ActivityFilter>,
) -> ApiResult<Vec<ActivityLogEntry>> {
    Ok(Json(state.bridge.get_activity_logs(filter).collect().await?))
}

pub async fn activity_stats(
    State(state): State<AppState>,
    Query(filter): Query<ActivityFilter>,
) -> ApiResult<ActivityStats> {
    Ok(Json(state.bridge.activity_stats(filter).await?))
}

pub async fn conflicts(
    State(state): State<AppState>,
    Query(filter): Query<ConflictFilter>,
) -> ApiResult<Vec<ConflictInfo>> {
    Ok(Json(state.bridge.get_sync_conflicts(filter).collect().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveBody {
    resolution: Option<String>,
}

pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ResolveBody>>,
) -> ApiResult<ConflictInfo> {
    let Json(body) = body.unwrap_or_default();
    let resolved = state
        .bridge
        .resolve_conflict(&id, body.resolution.as_deref())
        .await?;
    Ok(Json(resolved))
}

/// Latest sample, `null` until the sampler has produced one.
pub async fn current_metrics(State(state): State<AppState>) -> Json<Option<SystemMetrics>> {
    Json(state.metrics.borrow().clone())
}

/// `GET /api/metrics`: every new sample as a `system-metrics` SSE event.
/// The stream ends when the sampler stops.
pub async fn metrics_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let samples = stream::unfold(state.metrics, |mut rx| async move {
        rx.changed().await.ok()?;
        let sample = rx.borrow_and_update().clone();
        Some((sample, rx))
    })
    .filter_map(|sample| async move { sample })
    .filter_map(|sample| async move {
        serde_json::to_string(&sample)
            .map_err(|e| tracing::warn!(error = %e, "metrics sample not serializable"))
            .ok()
    })
    .map(|data| Ok::<SseEvent, Infallible>(SseEvent::default().event("system-metrics").data(data)));

    Sse::new(samples).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
