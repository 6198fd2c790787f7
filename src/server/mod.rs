//! HTTP surface: REST task management plus the WebSocket push channel.

mod ws;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::{Error, FetchError, TrackerError};
use crate::event::Broker;
use crate::runner::Runner;
use crate::task::{TaskId, TaskSnapshot};
use crate::taskq::CompletionState;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    pub broker: Arc<Broker>,
}

/// One task as exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: TaskSnapshot,
    pub state: CompletionState,
}

impl From<(TaskSnapshot, CompletionState)> for TaskView {
    fn from((task, state): (TaskSnapshot, CompletionState)) -> Self {
        Self { task, state }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    pub aggregator: String,
    pub slugs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdmitResponse {
    pub admitted: Vec<TaskSnapshot>,
    pub rejected: Vec<RejectedSlug>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectedSlug {
    pub slug: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
struct ClearQuery {
    /// Numeric completion state (0 queued, 1 running, 2 completed).
    state: i64,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(ws::ws_handler))
        .route("/api/tasks", post(admit_tasks).get(list_tasks).delete(clear_tasks))
        .route("/api/tasks/{id}", delete(remove_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map domain errors onto HTTP statuses.
fn error_response(err: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        Error::Tracker(TrackerError::NotFound) => StatusCode::NOT_FOUND,
        Error::Tracker(TrackerError::AlreadyExists)
        | Error::Tracker(TrackerError::CannotRemoveRunning)
        | Error::Tracker(TrackerError::IllegalTransition { .. }) => StatusCode::CONFLICT,
        Error::Tracker(TrackerError::InvalidState(_))
        | Error::Fetch(FetchError::UnknownAggregator(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

/// POST /api/tasks — admit a batch of slugs.
///
/// Admission is per-slug: valid slugs are admitted even when others in
/// the same batch are rejected.
async fn admit_tasks(
    State(state): State<AppState>,
    Json(req): Json<AdmitRequest>,
) -> impl IntoResponse {
    let mut admitted = Vec::new();
    let mut rejected = Vec::new();

    for slug in &req.slugs {
        if slug.trim().is_empty() {
            continue;
        }
        match state.runner.admit(&req.aggregator, slug).await {
            Ok(snapshot) => admitted.push(snapshot),
            Err(e) => {
                warn!(slug = %slug, error = %e, "Slug rejected");
                rejected.push(RejectedSlug {
                    slug: slug.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    (StatusCode::OK, Json(AdmitResponse { admitted, rejected }))
}

/// GET /api/tasks — full task list with states.
async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let tasks: Vec<TaskView> = state
        .runner
        .list()
        .await
        .into_iter()
        .map(TaskView::from)
        .collect();
    Json(tasks)
}

/// DELETE /api/tasks?state=N — bulk-remove every task in a state.
async fn clear_tasks(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> impl IntoResponse {
    let target = match CompletionState::from_ordinal(query.state) {
        Ok(s) => s,
        Err(e) => return error_response(e.into()).into_response(),
    };
    match state.runner.remove_in_state(target).await {
        Ok(removed) => Json(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// DELETE /api/tasks/{id}
async fn remove_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.runner.remove(&TaskId::from_raw(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/tasks/{id}/retry
async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.runner.retry(&TaskId::from_raw(id)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/tasks/{id}/cancel
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.runner.cancel(&TaskId::from_raw(id)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
