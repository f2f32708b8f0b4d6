//! Scheduled-task (cron definition) endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use ar_domain::task::ScheduledTask;

use super::validate::{
    validate_name, validate_prompt, validate_timeout, validate_timezone, validate_tools,
    validate_workspace,
};
use super::{created, ok, ok_message, ApiError, ApiResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateScheduledRequest {
    pub name: String,
    pub prompt: String,
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// PATCH body: absent fields stay untouched.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateScheduledRequest {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub workspace: Option<String>,
    pub timeout_ms: Option<u64>,
    pub auto_approve: Option<bool>,
    pub allowed_tools: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/scheduled-tasks`
pub async fn create_scheduled(
    State(state): State<AppState>,
    Json(body): Json<CreateScheduledRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let name = validate_name(&body.name)?;
    let prompt = validate_prompt(&body.prompt)?;
    state.cron.validate(&body.cron)?;
    let timezone = validate_timezone(body.timezone.as_deref().unwrap_or("UTC"))?;
    let workspace = validate_workspace(&state, body.workspace.as_deref())?;
    let timeout_ms = validate_timeout(&state, body.timeout_ms)?;
    let allowed_tools = validate_tools(body.allowed_tools)?;

    let mut scheduled = ScheduledTask::new(name, prompt, body.cron);
    scheduled.timezone = timezone;
    scheduled.workspace = workspace;
    scheduled.timeout_ms = timeout_ms;
    scheduled.auto_approve = body.auto_approve;
    scheduled.allowed_tools = allowed_tools;
    scheduled.enabled = body.enabled;
    if scheduled.enabled {
        scheduled.next_run = state.scheduler.compute_next_run(&scheduled, &Utc::now())?;
    }

    state.storage.scheduled.save(scheduled.clone()).await?;
    tracing::info!(
        scheduled_id = %scheduled.id,
        name = %scheduled.name,
        next_run = ?scheduled.next_run,
        "scheduled task created"
    );
    Ok(created(scheduled))
}

/// `GET /api/scheduled-tasks`
pub async fn list_scheduled(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tasks = state.storage.scheduled.get_all();
    ok(serde_json::json!({ "tasks": tasks, "total": tasks.len() }))
}

/// `PATCH /api/scheduled-tasks/:id`
pub async fn update_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateScheduledRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut scheduled = state
        .storage
        .scheduled
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("scheduled task {id} not found")))?;

    if let Some(name) = &body.name {
        scheduled.name = validate_name(name)?;
    }
    if let Some(prompt) = &body.prompt {
        scheduled.prompt = validate_prompt(prompt)?;
    }
    if let Some(cron) = &body.cron {
        state.cron.validate(cron)?;
        scheduled.cron = cron.clone();
    }
    if let Some(timezone) = &body.timezone {
        scheduled.timezone = validate_timezone(timezone)?;
    }
    if let Some(workspace) = &body.workspace {
        scheduled.workspace = validate_workspace(&state, Some(workspace))?;
    }
    if let Some(timeout_ms) = body.timeout_ms {
        scheduled.timeout_ms = validate_timeout(&state, Some(timeout_ms))?;
    }
    if let Some(auto_approve) = body.auto_approve {
        scheduled.auto_approve = auto_approve;
    }
    if let Some(allowed_tools) = body.allowed_tools {
        scheduled.allowed_tools = validate_tools(Some(allowed_tools))?;
    }
    if let Some(enabled) = body.enabled {
        scheduled.enabled = enabled;
    }

    // The schedule basis may have changed; recompute the next window.
    scheduled.next_run = if scheduled.enabled {
        state.scheduler.compute_next_run(&scheduled, &Utc::now())?
    } else {
        None
    };
    scheduled.updated_at = Utc::now();

    state.storage.scheduled.save(scheduled.clone()).await?;
    Ok(ok_message(scheduled, "scheduled task updated"))
}

/// `DELETE /api/scheduled-tasks/:id`
pub async fn delete_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.storage.scheduled.remove(id).await? {
        return Err(ApiError::not_found(format!(
            "scheduled task {id} not found"
        )));
    }
    tracing::info!(scheduled_id = %id, "scheduled task deleted");
    Ok(ok_message(serde_json::json!({ "id": id }), "scheduled task deleted"))
}

/// `POST /api/scheduled-tasks/:id/toggle` — flip `enabled`, maintaining
/// the `enabled=false ⇒ next_run=None` invariant.
pub async fn toggle_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut scheduled = state
        .storage
        .scheduled
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("scheduled task {id} not found")))?;

    scheduled.enabled = !scheduled.enabled;
    scheduled.next_run = if scheduled.enabled {
        state.scheduler.compute_next_run(&scheduled, &Utc::now())?
    } else {
        None
    };
    scheduled.updated_at = Utc::now();

    state.storage.scheduled.save(scheduled.clone()).await?;
    let message = if scheduled.enabled {
        "scheduled task enabled"
    } else {
        "scheduled task disabled"
    };
    Ok(ok_message(scheduled, message))
}

/// `POST /api/scheduled-tasks/:id/run` — queue a task from this definition
/// immediately, without advancing its bookkeeping.
pub async fn run_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = state.scheduler.run_scheduled_now(id).await?;
    Ok(ok_message(task, "task queued for immediate run"))
}
