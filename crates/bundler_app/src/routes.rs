//! HTTP surface over [`EngineHandle`].
//!
//! - `GET  /api/health`
//! - `POST /api/download/start` - start a retrieval for a list of urls
//! - `GET  /api/download/progress/:task_id` - current progress snapshot
//! - `GET  /api/download/stream/:task_id` - progress as server-sent events
//! - `POST /api/download/cancel/:task_id` - stop a running retrieval
//! - `GET  /api/download/zip/:task_id` - finished archive as an attachment

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use bundle_logging::{bundle_info, bundle_warn};
use bundler_core::ProgressSnapshot;
use bundler_engine::{EngineHandle, RetrievalRequest, TaskId, TaskState};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn create_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/download/start", post(start_download))
        .route("/api/download/progress/:task_id", get(download_progress))
        .route("/api/download/stream/:task_id", get(download_stream))
        .route("/api/download/cancel/:task_id", post(cancel_download))
        .route("/api/download/zip/:task_id", get(download_zip))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub struct StartDownload {
    pub urls: Vec<String>,
    pub user: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    task_id: TaskId,
    #[serde(flatten)]
    snapshot: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": error, "message": message.into() })),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn start_download(
    State(engine): State<EngineHandle>,
    Json(body): Json<StartDownload>,
) -> Response {
    if body.urls.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing URLs",
            "at least one url is required",
        );
    }
    if body.limit == Some(0) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid limit",
            "limit must allow at least one url",
        );
    }
    let request = RetrievalRequest {
        urls: body.urls,
        user_context: body.user,
        limit: body.limit,
    };
    let task_id = engine.start(request);
    (StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))).into_response()
}

async fn download_progress(
    State(engine): State<EngineHandle>,
    Path(task_id): Path<TaskId>,
) -> Response {
    let Some(snapshot) = engine.progress(task_id) else {
        return error_response(StatusCode::NOT_FOUND, "Task not found", "invalid task id");
    };
    let (truncated, error) = match engine.state(task_id) {
        Some(TaskState::Finished(outcome)) => (Some(outcome.truncated), None),
        Some(TaskState::Failed(reason)) => (None, Some(reason)),
        Some(TaskState::Running) | None => (None, None),
    };
    Json(ProgressResponse {
        task_id,
        snapshot,
        truncated,
        error,
    })
    .into_response()
}

struct StreamCursor {
    engine: EngineHandle,
    task_id: TaskId,
    last: Option<ProgressSnapshot>,
    done: bool,
}

/// Sends a `progress` event whenever the snapshot changes and ends after the
/// first terminal one. Also ends if the task is swept while streaming.
async fn download_stream(
    State(engine): State<EngineHandle>,
    Path(task_id): Path<TaskId>,
) -> Response {
    if engine.progress(task_id).is_none() {
        return error_response(StatusCode::NOT_FOUND, "Task not found", "invalid task id");
    }
    let cursor = StreamCursor {
        engine,
        task_id,
        last: None,
        done: false,
    };
    let events = stream::unfold(cursor, |mut cursor| async move {
        if cursor.done {
            return None;
        }
        loop {
            let snapshot = cursor.engine.progress(cursor.task_id)?;
            if cursor.last != Some(snapshot) {
                cursor.last = Some(snapshot);
                cursor.done = snapshot.is_terminal();
                return Some((Ok::<_, Infallible>(progress_event(&snapshot)), cursor));
            }
            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }
    });
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn progress_event(snapshot: &ProgressSnapshot) -> Event {
    Event::default()
        .event("progress")
        .json_data(snapshot)
        .unwrap_or_else(|err| {
            bundle_warn!("Progress event not serializable: {}", err);
            Event::default().comment("progress unavailable")
        })
}

async fn cancel_download(
    State(engine): State<EngineHandle>,
    Path(task_id): Path<TaskId>,
) -> Response {
    if engine.cancel(task_id) {
        bundle_info!("Task {} cancelled by client", task_id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Task not running", "invalid task id")
    }
}

async fn download_zip(
    State(engine): State<EngineHandle>,
    Path(task_id): Path<TaskId>,
) -> Response {
    match engine.state(task_id) {
        Some(TaskState::Finished(outcome)) => (
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", outcome.archive_name),
                ),
            ],
            outcome.archive.bytes().to_vec(),
        )
            .into_response(),
        Some(TaskState::Running) => error_response(
            StatusCode::NOT_FOUND,
            "Download not ready",
            "download is not completed yet",
        ),
        Some(TaskState::Failed(reason)) => {
            error_response(StatusCode::NOT_FOUND, "Download failed", reason)
        }
        None => error_response(StatusCode::NOT_FOUND, "Task not found", "invalid task id"),
    }
}
