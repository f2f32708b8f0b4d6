//! Task queue and history endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use ar_domain::task::Task;

use super::validate::{validate_prompt, validate_timeout, validate_tools, validate_workspace};
use super::{created, ok, ok_message, ApiError, ApiResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / query shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

const MAX_LIMIT: usize = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/tasks` — create a queue task.
pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let prompt = validate_prompt(&body.prompt)?;
    let workspace = validate_workspace(&state, body.workspace.as_deref())?;
    let timeout_ms = validate_timeout(&state, body.timeout_ms)?;
    let allowed_tools = validate_tools(body.allowed_tools)?;

    let mut task = Task::new(prompt);
    task.workspace = workspace;
    task.timeout_ms = timeout_ms;
    task.auto_approve = body.auto_approve;
    task.allowed_tools = allowed_tools;

    state.storage.queue.add(task.clone()).await?;
    tracing::info!(task_id = %task.id, "task queued");
    Ok(created(task))
}

/// `GET /api/tasks` — the pending queue, FIFO order.
pub async fn list_tasks(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tasks = state.storage.queue.get_all();
    ok(serde_json::json!({ "tasks": tasks, "total": tasks.len() }))
}

/// `GET /api/tasks/running`
pub async fn list_running(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tasks = state.storage.running.get_all();
    ok(serde_json::json!({ "tasks": tasks, "total": tasks.len() }))
}

/// `GET /api/tasks/completed?page&limit`
pub async fn list_completed(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<serde_json::Value> {
    let page = state
        .storage
        .history
        .get_completed(query.page, query.limit.min(MAX_LIMIT));
    ok(page)
}

/// `GET /api/tasks/failed?page&limit`
pub async fn list_failed(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<serde_json::Value> {
    let page = state
        .storage
        .history
        .get_failed(query.page, query.limit.min(MAX_LIMIT));
    ok(page)
}

/// `GET /api/tasks/:id` — searches queue, running, then the histories.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .storage
        .find_task(id)
        .map(ok)
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))
}

/// `DELETE /api/tasks/:id` — remove a pending task from the queue, or
/// signal cancellation of the task currently executing.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.storage.queue.remove(id).await? {
        tracing::info!(task_id = %id, "queued task removed");
        return Ok(ok_message(
            serde_json::json!({ "id": id }),
            "task removed from queue",
        ));
    }
    if state.storage.running.get(id).is_some() {
        if state.executor.cancel_current(id) {
            tracing::info!(task_id = %id, "cancellation requested for running task");
            return Ok(ok_message(
                serde_json::json!({ "id": id }),
                "cancellation requested",
            ));
        }
        return Err(ApiError::validation(
            "task is running and could not be cancelled",
        ));
    }
    Err(ApiError::not_found(format!("task {id} not in queue")))
}

/// `DELETE /api/tasks/clear` — drop every pending task.
pub async fn clear_tasks(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.storage.queue.clear().await?;
    tracing::info!("task queue cleared");
    Ok(ok_message(serde_json::json!({}), "queue cleared"))
}

/// `POST /api/tasks/:id/run` — move a queued task to the head.
pub async fn run_task_now(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = state.scheduler.run_task_now(id).await?;
    Ok(ok_message(task, "task moved to the front of the queue"))
}
