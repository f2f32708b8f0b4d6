//! REST/SSE control plane: the router, the response envelope, and the
//! error-to-status mapping.
//!
//! Every success is `{"success": true, "data": ..., "message"?: ...}`;
//! every failure is `{"success": false, "error": ..., "code": ...}` with
//! an appropriate 4xx/5xx status.

pub mod scheduled;
pub mod scheduler;
pub mod stream;
pub mod tasks;
mod validate;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde::Serialize;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

pub fn ok_message<T: Serialize>(data: T, message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data, "message": message }))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::CREATED, ok(data))
}

/// A typed API failure carrying the HTTP status and machine code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            code,
            error: error.into(),
        }
    }

    pub fn validation(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", error)
    }

    pub fn invalid_workspace(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_WORKSPACE", error)
    }

    pub fn invalid_tool(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_TOOL", error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "TASK_NOT_FOUND", error)
    }
}

impl From<ar_domain::Error> for ApiError {
    fn from(e: ar_domain::Error) -> Self {
        use ar_domain::Error;
        let status = match &e {
            Error::Validation(_)
            | Error::InvalidCron(_)
            | Error::SessionNotWaiting(_)
            | Error::QuestionIdMismatch { .. }
            | Error::AnswerTimeout(_) => StatusCode::BAD_REQUEST,
            Error::TaskNotFound(_) | Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::StorageBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ConcurrencyLimit => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: e.code(),
            error: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.error,
            "code": self.code,
        }));
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health probe
        .route("/api/health", get(health))
        // Task queue & history
        .route("/api/tasks", post(tasks::create_task))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/running", get(tasks::list_running))
        .route("/api/tasks/completed", get(tasks::list_completed))
        .route("/api/tasks/failed", get(tasks::list_failed))
        .route("/api/tasks/clear", delete(tasks::clear_tasks))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id", delete(tasks::delete_task))
        .route("/api/tasks/:id/run", post(tasks::run_task_now))
        // Scheduled (cron) tasks
        .route("/api/scheduled-tasks", post(scheduled::create_scheduled))
        .route("/api/scheduled-tasks", get(scheduled::list_scheduled))
        .route("/api/scheduled-tasks/:id", patch(scheduled::update_scheduled))
        .route("/api/scheduled-tasks/:id", delete(scheduled::delete_scheduled))
        .route("/api/scheduled-tasks/:id/toggle", post(scheduled::toggle_scheduled))
        .route("/api/scheduled-tasks/:id/run", post(scheduled::run_scheduled))
        // Scheduler control
        .route("/api/scheduler/start", post(scheduler::start))
        .route("/api/scheduler/stop", post(scheduler::stop))
        .route("/api/scheduler/status", get(scheduler::status))
        .route("/api/scheduler/validate-cron", post(scheduler::validate_cron))
        .route("/api/scheduler/cron-examples", get(scheduler::cron_examples))
        // Streaming sessions
        .route("/api/task/stream", post(stream::run_task_stream))
        .route("/api/task/answer", post(stream::submit_answer))
        .route("/api/task/session/:id/status", get(stream::session_status))
        .route("/api/task/sessions", get(stream::list_sessions))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    ok(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
