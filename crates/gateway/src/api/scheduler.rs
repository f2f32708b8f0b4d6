//! Scheduler lifecycle and cron validation endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::runtime::cron::parse_tz;
use crate::state::AppState;

use super::{ok, ok_message, ApiError, ApiResult};

/// `POST /api/scheduler/start`
pub async fn start(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    if !state.scheduler.start().await {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "SCHEDULER_ALREADY_RUNNING",
            "scheduler is already running",
        ));
    }
    Ok(ok_message(state.scheduler.status_info(), "scheduler started"))
}

/// `POST /api/scheduler/stop`
pub async fn stop(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    if !state.scheduler.stop().await {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "SCHEDULER_NOT_RUNNING",
            "scheduler is not running",
        ));
    }
    Ok(ok_message(state.scheduler.status_info(), "scheduler stopped"))
}

/// `GET /api/scheduler/status`
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    ok(state.scheduler.status_info())
}

#[derive(Debug, Deserialize)]
pub struct ValidateCronRequest {
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// `POST /api/scheduler/validate-cron` — syntax check plus a preview of
/// the next few fire times.
pub async fn validate_cron(
    State(state): State<AppState>,
    Json(body): Json<ValidateCronRequest>,
) -> Json<serde_json::Value> {
    let tz = parse_tz(body.timezone.as_deref().unwrap_or("UTC"));
    match state.cron.parse(&body.cron) {
        Ok(expr) => {
            let next_runs = expr.next_fires(&Utc::now(), 5, tz);
            if next_runs.is_empty() {
                return ok(serde_json::json!({
                    "valid": false,
                    "error": "expression never fires within one year",
                }));
            }
            ok(serde_json::json!({
                "valid": true,
                "next_runs": next_runs,
            }))
        }
        Err(e) => ok(serde_json::json!({
            "valid": false,
            "error": e.to_string(),
        })),
    }
}

/// `GET /api/scheduler/cron-examples`
pub async fn cron_examples() -> Json<serde_json::Value> {
    let examples = [
        ("* * * * *", "every minute"),
        ("*/5 * * * *", "every 5 minutes"),
        ("0 * * * *", "on the hour"),
        ("30 9 * * *", "daily at 09:30"),
        ("0 9 * * 1-5", "weekdays at 09:00"),
        ("0 0 * * 0", "Sundays at midnight"),
        ("0 3 1 * *", "first of the month at 03:00"),
        ("0 0 L * *", "last day of the month at midnight"),
        ("0 12 LW * *", "last weekday of the month at noon"),
        ("0 9 15W * *", "nearest weekday to the 15th at 09:00"),
        ("0 9 * * 1#2", "second Monday of the month at 09:00"),
        ("@daily", "alias for 0 0 * * *"),
        ("*/30 * * * * *", "every 30 seconds (6-field form)"),
    ];
    let examples: Vec<serde_json::Value> = examples
        .iter()
        .map(|(expression, description)| {
            serde_json::json!({
                "expression": expression,
                "description": description,
            })
        })
        .collect();
    ok(serde_json::json!({ "examples": examples }))
}
