//! Request field validation shared by the task and scheduled-task
//! endpoints.

use ar_domain::task::{is_valid_name, MAX_NAME_LENGTH, MAX_PROMPT_LENGTH};
use ar_domain::tool::is_valid_tool;

use super::ApiError;
use crate::state::AppState;

pub fn validate_prompt(prompt: &str) -> Result<String, ApiError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("prompt must not be blank"));
    }
    if trimmed.chars().count() > MAX_PROMPT_LENGTH {
        return Err(ApiError::validation(format!(
            "prompt must not exceed {MAX_PROMPT_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_name(name: &str) -> Result<String, ApiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("name must not be blank"));
    }
    if !is_valid_name(trimmed) {
        return Err(ApiError::validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters of letters, \
             digits, underscores, dashes and spaces"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_timeout(state: &AppState, timeout_ms: Option<u64>) -> Result<u64, ApiError> {
    let limits = &state.config.executor;
    let timeout_ms = timeout_ms.unwrap_or(limits.default_timeout_ms);
    if timeout_ms < limits.min_timeout_ms || timeout_ms > limits.max_timeout_ms {
        return Err(ApiError::validation(format!(
            "timeout_ms must be within {}..={}",
            limits.min_timeout_ms, limits.max_timeout_ms
        )));
    }
    Ok(timeout_ms)
}

pub fn validate_tools(tools: Option<Vec<String>>) -> Result<Option<Vec<String>>, ApiError> {
    if let Some(tools) = &tools {
        for tool in tools {
            if !is_valid_tool(tool) {
                return Err(ApiError::invalid_tool(format!("invalid tool name: {tool}")));
            }
        }
    }
    Ok(tools)
}

/// Resolve a requested workspace against the sandbox. Returns the resolved
/// absolute path as a string for the task record.
pub fn validate_workspace(state: &AppState, workspace: Option<&str>) -> Result<String, ApiError> {
    let requested = workspace.unwrap_or(".");
    state
        .config
        .workspace
        .resolve(requested)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| ApiError::invalid_workspace(e.to_string()))
}

pub fn validate_timezone(tz: &str) -> Result<String, ApiError> {
    if tz.parse::<chrono_tz::Tz>().is_err() {
        return Err(ApiError::validation(format!(
            "invalid timezone: '{tz}' — use IANA names like 'America/New_York' or 'UTC'"
        )));
    }
    Ok(tz.to_string())
}
