//! Streaming session endpoints: open a live agent stream over SSE, submit
//! answers out-of-band, and inspect sessions.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use ar_agent::AgentOptions;
use ar_domain::config::PermissionMode;
use ar_domain::question::{Answer, AnswerValue};
use ar_sessions::StreamRequest;

use super::validate::{validate_prompt, validate_tools, validate_workspace};
use super::{ok, ok_message, ApiResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StreamTaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub continue_conversation: bool,
    /// Resume a previous agent session by id.
    #[serde(default)]
    pub resume: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub session_id: Uuid,
    pub question_id: String,
    pub answer: AnswerValue,
    #[serde(default)]
    pub follow_up_answers: Option<std::collections::HashMap<String, AnswerValue>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/task/stream` — run a task as a live SSE stream.
///
/// The first record identifies the session (clients need the id to answer
/// questions); every following record is one agent event. The connection
/// stays open until a terminal event or client disconnect.
pub async fn run_task_stream(
    State(state): State<AppState>,
    Json(body): Json<StreamTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let prompt = validate_prompt(&body.prompt)?;
    let workspace = validate_workspace(&state, body.workspace.as_deref())?;
    let allowed_tools = validate_tools(body.allowed_tools)?;

    let options = AgentOptions {
        workspace: workspace.into(),
        allowed_tools,
        permission_mode: if body.auto_approve {
            PermissionMode::AcceptEdits
        } else {
            state.config.agent.default_permission_mode
        },
        continue_conversation: body.continue_conversation,
        resume_session_id: body.resume,
    };

    let (session_id, events) = state
        .sessions
        .open_stream(state.backend.clone(), StreamRequest { prompt, options })
        .await?;

    let opening = futures_util::stream::once(async move {
        Ok::<_, std::convert::Infallible>(
            Event::default()
                .event("session")
                .data(serde_json::json!({ "session_id": session_id }).to_string()),
        )
    });
    let events = events.map(|event| {
        Ok::<_, std::convert::Infallible>(
            Event::default().data(serde_json::to_string(&event).unwrap_or_default()),
        )
    });

    Ok(Sse::new(opening.chain(events)).keep_alive(KeepAlive::default()))
}

/// `POST /api/task/answer` — deliver an answer to a waiting session.
pub async fn submit_answer(
    State(state): State<AppState>,
    Json(body): Json<AnswerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let answer = Answer {
        question_id: body.question_id,
        answer: body.answer,
        follow_up_answers: body.follow_up_answers,
    };
    state.sessions.submit_answer(body.session_id, answer).await?;
    Ok(ok_message(
        serde_json::json!({ "session_id": body.session_id }),
        "answer accepted",
    ))
}

/// `GET /api/task/session/:id/status`
pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = state.sessions.get_status(id).await?;
    Ok(ok(status))
}

/// `GET /api/task/sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.list_sessions().await;
    ok(serde_json::json!({ "sessions": sessions, "total": sessions.len() }))
}
