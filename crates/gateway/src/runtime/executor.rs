//! Single-task executor: validation, timeout, status-transition
//! discipline, error classification, and bounded backoff retry.
//!
//! One task in flight per executor instance. The executor never sleeps for
//! a retry; it stamps `earliest_run_at` on the re-queued task and lets the
//! scheduler's queue pop honour the hold. `cancel_current` is the explicit
//! cancel signal: the in-flight attempt observes it and terminalises the
//! task as cancelled.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ar_agent::outcome::{collect_run, AgentOutcome};
use ar_agent::{AgentBackend, AgentOptions};
use ar_domain::config::{AgentConfig, ExecutorConfig, PermissionMode};
use ar_domain::task::{Task, TaskStatus, MAX_PROMPT_LENGTH};
use ar_domain::tool::validate_allowed_tools;
use ar_domain::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::storage::TaskStorage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry backoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BASE_DELAY_SECS: f64 = 5.0;
const MAX_DELAY_SECS: f64 = 60.0;
const JITTER: f64 = 0.1;

/// Exponential backoff with ±10% jitter: `min(60s, 5s·2^retries)`.
pub fn calculate_retry_delay(retry_count: u32) -> Duration {
    use rand::Rng;

    let exp = retry_count.min(10);
    let delay = (BASE_DELAY_SECS * f64::from(1u32 << exp)).min(MAX_DELAY_SECS);
    let jitter = delay * JITTER * rand::thread_rng().gen_range(-1.0..=1.0);
    Duration::from_secs_f64((delay + jitter).max(0.0))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Transient,
    Permanent,
    Timeout,
    UserCancel,
    Validation,
    Resource,
}

impl ErrorType {
    pub fn retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::Resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Classify an error message by keyword.
///
/// The order is deterministic: timeout beats resource beats validation, so
/// a message like "connection timeout" classifies as `Timeout`.
pub fn classify_error(message: &str) -> ErrorType {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorType::Timeout;
    }
    const RESOURCE_KEYWORDS: &[&str] = &["rate limit", "connection", "network", "unavailable"];
    if RESOURCE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return ErrorType::Resource;
    }
    const VALIDATION_KEYWORDS: &[&str] = &["invalid", "validation", "not found", "permission"];
    if VALIDATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return ErrorType::Validation;
    }
    ErrorType::Transient
}

/// Diagnostic record attached to `task.result.errors` on every failed
/// attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<Utc>,
    pub context: serde_json::Value,
}

impl ExecutionError {
    pub fn new(error_type: ErrorType, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            error_type,
            message: message.into(),
            severity: ErrorSeverity::Medium,
            retryable: error_type.retryable(),
            timestamp: Utc::now(),
            context,
        }
    }
}

/// Collects diagnostics across one `execute` call.
#[derive(Default)]
pub struct ErrorCollector {
    errors: Vec<ExecutionError>,
}

impl ErrorCollector {
    pub fn add(&mut self, error: ExecutionError) -> &ExecutionError {
        self.errors.push(error);
        self.errors.last().expect("just pushed")
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn latest(&self) -> Option<&ExecutionError> {
        self.errors.last()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The only transitions the system ever performs. Anything else is a
/// logged no-op.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Pending)
            | (Running, Cancelled)
            | (Failed, Pending)
            | (Failed, Cancelled)
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ExecutionResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub files_changed: Vec<String>,
    pub tools_used: Vec<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            cost_usd: None,
            duration_ms: None,
            files_changed: Vec::new(),
            tools_used: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// How one execution attempt ended.
enum Attempt {
    Cancelled,
    TimedOut,
    Finished(Result<AgentOutcome>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskExecutor {
    storage: Arc<TaskStorage>,
    backend: Arc<dyn AgentBackend>,
    config: ExecutorConfig,
    agent_config: AgentConfig,
    current: Mutex<Option<Task>>,
    current_cancel: Mutex<Option<CancellationToken>>,
    executing: AtomicBool,
}

impl TaskExecutor {
    pub fn new(
        storage: Arc<TaskStorage>,
        backend: Arc<dyn AgentBackend>,
        config: ExecutorConfig,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            storage,
            backend,
            config,
            agent_config,
            current: Mutex::new(None),
            current_cancel: Mutex::new(None),
            executing: AtomicBool::new(false),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn current_task(&self) -> Option<Task> {
        self.current.lock().clone()
    }

    /// Signal cancellation of the in-flight task. Returns true iff
    /// `task_id` is the task currently executing; the attempt observes the
    /// signal and terminalises the task as cancelled.
    pub fn cancel_current(&self, task_id: Uuid) -> bool {
        let is_current = self
            .current
            .lock()
            .as_ref()
            .map_or(false, |t| t.id == task_id);
        if !is_current {
            return false;
        }
        match self.current_cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drive one task through its lifecycle. The task is expected to have
    /// been popped from the queue (it is in no collection on entry) and is
    /// always parked in exactly one collection on return.
    pub async fn execute(&self, task: Task) -> ExecutionResult {
        if let Err(e) = self.validate(&task) {
            return self.reject(task, e).await;
        }

        let cancel = CancellationToken::new();
        self.executing.store(true, Ordering::SeqCst);
        *self.current.lock() = Some(task.clone());
        *self.current_cancel.lock() = Some(cancel.clone());

        let result = self.run_one(task, cancel).await;

        // Always clear the slot, whatever path run_one took.
        *self.current_cancel.lock() = None;
        *self.current.lock() = None;
        self.executing.store(false, Ordering::SeqCst);
        result
    }

    /// Validation failures are rejected without retry.
    fn validate(&self, task: &Task) -> Result<()> {
        if task.prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be blank".into()));
        }
        if task.prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(Error::Validation(format!(
                "prompt exceeds {MAX_PROMPT_LENGTH} characters"
            )));
        }
        if task.timeout_ms < self.config.min_timeout_ms
            || task.timeout_ms > self.config.max_timeout_ms
        {
            return Err(Error::Validation(format!(
                "timeout_ms must be within {}..={}",
                self.config.min_timeout_ms, self.config.max_timeout_ms
            )));
        }
        if let Some(tools) = &task.allowed_tools {
            validate_allowed_tools(tools)?;
        }
        Ok(())
    }

    async fn run_one(&self, mut task: Task, cancel: CancellationToken) -> ExecutionResult {
        let mut collector = ErrorCollector::default();

        // Pending -> Running.
        if !can_transition(task.status, TaskStatus::Running) {
            tracing::warn!(
                task_id = %task.id,
                from = %task.status,
                "refusing illegal transition to running"
            );
            return ExecutionResult::failure(
                "task is not in a runnable state",
                format!("illegal transition: {} -> running", task.status),
            );
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.earliest_run_at = None;
        if let Err(e) = self.storage.running.add(task.clone()).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to record running task");
        }

        tracing::info!(
            task_id = %task.id,
            prompt = %task.prompt.chars().take(50).collect::<String>(),
            "task started"
        );

        let options = self.agent_options(&task);
        let started = std::time::Instant::now();
        let attempt = async {
            let run = self.backend.run(&task.prompt, options).await?;
            Ok::<AgentOutcome, Error>(collect_run(run).await)
        };

        // The explicit cancel signal outranks timeout and classification.
        let attempted = tokio::select! {
            _ = cancel.cancelled() => Attempt::Cancelled,
            outcome = tokio::time::timeout(Duration::from_millis(task.timeout_ms), attempt) => {
                match outcome {
                    Ok(inner) => Attempt::Finished(inner),
                    Err(_) => Attempt::TimedOut,
                }
            }
        };

        match attempted {
            Attempt::Cancelled => {
                self.handle_failure(
                    task,
                    ErrorType::UserCancel,
                    "cancelled by user".to_string(),
                    &mut collector,
                )
                .await
            }
            Attempt::Finished(Ok(outcome)) if outcome.success => {
                self.handle_success(task, outcome, started.elapsed()).await
            }
            Attempt::Finished(Ok(outcome)) => {
                let message = if outcome.message.trim().is_empty() {
                    "agent reported failure".to_string()
                } else {
                    outcome.message.clone()
                };
                // Keep whatever diagnostics the partial run produced.
                task.files_changed = outcome.files_changed.clone();
                task.tools_used = outcome.tools_used.clone();
                task.cost_usd = outcome.cost_usd;
                // An adapter-declared permanent failure skips the keyword
                // heuristics entirely.
                let error_type = if outcome.permanent {
                    ErrorType::Permanent
                } else {
                    classify_error(&message)
                };
                self.handle_failure(task, error_type, message, &mut collector)
                    .await
            }
            Attempt::Finished(Err(e)) => {
                let message = e.to_string();
                let error_type = classify_error(&message);
                self.handle_failure(task, error_type, message, &mut collector)
                    .await
            }
            Attempt::TimedOut => {
                let message = format!("task execution timeout ({} ms)", task.timeout_ms);
                self.handle_failure(task, ErrorType::Timeout, message, &mut collector)
                    .await
            }
        }
    }

    async fn handle_success(
        &self,
        mut task: Task,
        outcome: AgentOutcome,
        elapsed: Duration,
    ) -> ExecutionResult {
        task.finished_at = Some(Utc::now());
        task.status = TaskStatus::Completed;
        task.files_changed = outcome.files_changed.clone();
        task.tools_used = outcome.tools_used.clone();
        task.cost_usd = outcome.cost_usd;
        task.duration_ms = outcome.duration_ms.or(Some(elapsed.as_millis() as u64));
        task.error = None;

        let mut result = task.result.take().unwrap_or_else(|| serde_json::json!({}));
        if let Some(obj) = result.as_object_mut() {
            obj.insert("success".into(), serde_json::Value::Bool(true));
            obj.insert(
                "message".into(),
                serde_json::Value::String(outcome.message.clone()),
            );
        }
        task.result = Some(result);

        if let Err(e) = self.storage.running.remove(task.id).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to leave running state");
        }
        if let Err(e) = self.storage.history.add_completed(task.clone()).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to record completion");
        }

        tracing::info!(
            task_id = %task.id,
            duration_ms = task.duration_ms,
            cost_usd = task.cost_usd,
            "task completed"
        );

        ExecutionResult {
            success: true,
            message: outcome.message,
            cost_usd: task.cost_usd,
            duration_ms: task.duration_ms,
            files_changed: task.files_changed.clone(),
            tools_used: task.tools_used.clone(),
            error: None,
        }
    }

    /// Retry-or-terminalise after any failed attempt.
    async fn handle_failure(
        &self,
        mut task: Task,
        error_type: ErrorType,
        message: String,
        collector: &mut ErrorCollector,
    ) -> ExecutionResult {
        collector.add(ExecutionError::new(
            error_type,
            message.clone(),
            serde_json::json!({ "task_id": task.id }),
        ));
        append_error_record(&mut task, collector.latest().expect("just added"));

        if error_type.retryable() && task.retries < self.config.max_retries {
            // Running -> Pending (retry).
            task.retries += 1;
            let delay = calculate_retry_delay(task.retries);
            task.reset_for_retry();
            task.earliest_run_at = Some(
                Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            );
            task.error = Some(format!(
                "retry {}/{}: {message}",
                task.retries, self.config.max_retries
            ));

            if let Err(e) = self.storage.running.remove(task.id).await {
                tracing::error!(task_id = %task.id, error = %e, "failed to leave running state");
            }
            if let Err(e) = self.storage.queue.add(task.clone()).await {
                tracing::error!(task_id = %task.id, error = %e, "failed to re-queue for retry");
            }

            tracing::info!(
                task_id = %task.id,
                retries = task.retries,
                delay_secs = delay.as_secs(),
                error_type = ?error_type,
                "task scheduled for retry"
            );
            return ExecutionResult::failure(
                format!(
                    "task scheduled for retry ({}/{})",
                    task.retries, self.config.max_retries
                ),
                message,
            );
        }

        // Running -> Failed, or -> Cancelled on the explicit signal. Both
        // terminal states are parked in failed history.
        let cancelled = error_type == ErrorType::UserCancel;
        task.finished_at = Some(Utc::now());
        task.status = if cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        task.error = Some(message.clone());
        if let Some(result) = task.result.as_mut().and_then(|r| r.as_object_mut()) {
            result.insert("success".into(), serde_json::Value::Bool(false));
            result.insert("error".into(), serde_json::Value::String(message.clone()));
        }

        if let Err(e) = self.storage.running.remove(task.id).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to leave running state");
        }
        if let Err(e) = self.storage.history.add_failed(task.clone()).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to record failure");
        }

        if cancelled {
            tracing::info!(task_id = %task.id, "task cancelled");
            ExecutionResult::failure("task cancelled", message)
        } else {
            tracing::error!(task_id = %task.id, error = %message, "task failed permanently");
            ExecutionResult::failure("task failed after exhausting retries", message)
        }
    }

    /// Validation rejection: a synthetic failed outcome, never retried.
    async fn reject(&self, mut task: Task, error: Error) -> ExecutionResult {
        let message = error.to_string();
        tracing::error!(task_id = %task.id, error = %message, "task rejected by validation");

        task.finished_at = Some(Utc::now());
        task.status = TaskStatus::Failed;
        task.error = Some(message.clone());
        let record = ExecutionError::new(
            ErrorType::Validation,
            message.clone(),
            serde_json::json!({ "task_id": task.id }),
        );
        append_error_record(&mut task, &record);
        if let Some(result) = task.result.as_mut().and_then(|r| r.as_object_mut()) {
            result.insert("success".into(), serde_json::Value::Bool(false));
            result.insert("error".into(), serde_json::Value::String(message.clone()));
        }

        if let Err(e) = self.storage.history.add_failed(task).await {
            tracing::error!(error = %e, "failed to record rejected task");
        }
        ExecutionResult::failure("task validation failed", message)
    }

    fn agent_options(&self, task: &Task) -> AgentOptions {
        AgentOptions {
            workspace: PathBuf::from(&task.workspace),
            allowed_tools: task.allowed_tools.clone(),
            permission_mode: if task.auto_approve {
                PermissionMode::AcceptEdits
            } else {
                self.agent_config.default_permission_mode
            },
            continue_conversation: false,
            resume_session_id: None,
        }
    }
}

/// Append a diagnostic record to `task.result.errors`, preserving records
/// from earlier attempts.
fn append_error_record(task: &mut Task, record: &ExecutionError) {
    let mut result = task.result.take().unwrap_or_else(|| serde_json::json!({}));
    if !result.is_object() {
        result = serde_json::json!({});
    }
    if let Some(obj) = result.as_object_mut() {
        let errors = obj
            .entry("errors")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(array) = errors.as_array_mut() {
            array.push(serde_json::to_value(record).unwrap_or_default());
        }
    }
    task.result = Some(result);
}

#[cfg(test)]
mod tests {
    use ar_agent::scripted::{Script, ScriptedBackend};
    use ar_domain::config::StorageConfig;
    use ar_domain::stream::AgentEvent;

    use super::*;

    fn storage(dir: &std::path::Path) -> Arc<TaskStorage> {
        let config = StorageConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Arc::new(TaskStorage::open(&config).unwrap())
    }

    fn executor(storage: Arc<TaskStorage>, backend: ScriptedBackend) -> TaskExecutor {
        TaskExecutor::new(
            storage,
            Arc::new(backend),
            ExecutorConfig::default(),
            AgentConfig::default(),
        )
    }

    // ── classification ──────────────────────────────────────────────

    #[test]
    fn classify_timeout() {
        assert_eq!(classify_error("operation timeout"), ErrorType::Timeout);
        assert_eq!(classify_error("request timed out"), ErrorType::Timeout);
    }

    #[test]
    fn classify_resource() {
        assert_eq!(classify_error("rate limit exceeded"), ErrorType::Resource);
        assert_eq!(classify_error("connection refused"), ErrorType::Resource);
        assert_eq!(classify_error("network unreachable"), ErrorType::Resource);
        assert_eq!(classify_error("service unavailable"), ErrorType::Resource);
    }

    #[test]
    fn classify_validation() {
        assert_eq!(classify_error("invalid argument"), ErrorType::Validation);
        assert_eq!(classify_error("file not found"), ErrorType::Validation);
        assert_eq!(classify_error("permission denied"), ErrorType::Validation);
    }

    #[test]
    fn classify_default_transient() {
        assert_eq!(classify_error("something odd happened"), ErrorType::Transient);
    }

    #[test]
    fn classify_order_is_deterministic() {
        // Both timeout and resource keywords present: timeout wins.
        assert_eq!(classify_error("connection timeout"), ErrorType::Timeout);
        // Resource beats validation.
        assert_eq!(
            classify_error("rate limit on invalid endpoint"),
            ErrorType::Resource
        );
    }

    #[test]
    fn retryability() {
        assert!(ErrorType::Transient.retryable());
        assert!(ErrorType::Timeout.retryable());
        assert!(ErrorType::Resource.retryable());
        assert!(!ErrorType::Validation.retryable());
        assert!(!ErrorType::Permanent.retryable());
        assert!(!ErrorType::UserCancel.retryable());
    }

    // ── backoff ─────────────────────────────────────────────────────

    #[test]
    fn backoff_grows_and_caps() {
        for _ in 0..20 {
            let d1 = calculate_retry_delay(1).as_secs_f64();
            assert!((9.0..=11.0).contains(&d1), "retry 1 got {d1}");
            let d2 = calculate_retry_delay(2).as_secs_f64();
            assert!((18.0..=22.0).contains(&d2), "retry 2 got {d2}");
            let d6 = calculate_retry_delay(6).as_secs_f64();
            assert!((54.0..=66.0).contains(&d6), "capped retry got {d6}");
        }
    }

    #[test]
    fn backoff_is_never_negative() {
        for retries in 0..12 {
            assert!(calculate_retry_delay(retries) >= Duration::ZERO);
        }
    }

    // ── state machine ───────────────────────────────────────────────

    #[test]
    fn transition_table() {
        use TaskStatus::*;
        assert!(can_transition(Pending, Running));
        assert!(can_transition(Pending, Cancelled));
        assert!(can_transition(Running, Completed));
        assert!(can_transition(Running, Failed));
        assert!(can_transition(Running, Pending));
        assert!(can_transition(Running, Cancelled));
        assert!(can_transition(Failed, Pending));
        assert!(can_transition(Failed, Cancelled));

        assert!(!can_transition(Completed, Running));
        assert!(!can_transition(Completed, Pending));
        assert!(!can_transition(Cancelled, Pending));
        assert!(!can_transition(Pending, Completed));
        assert!(!can_transition(Pending, Failed));
        assert!(!can_transition(Failed, Running));
    }

    // ── execute: success ────────────────────────────────────────────

    #[tokio::test]
    async fn successful_execution_lands_in_completed_history() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let exec = executor(storage.clone(), ScriptedBackend::succeeding("hello"));

        let task = Task::new("echo hello");
        let result = exec.execute(task.clone()).await;

        assert!(result.success);
        assert_eq!(result.message, "hello");
        assert!(result.cost_usd.is_some());
        assert!(result.duration_ms.is_some());

        let stored = storage.history.get(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.started_at.is_some());
        assert!(stored.finished_at.is_some());
        assert_eq!(stored.result.as_ref().unwrap()["message"], "hello");
        assert_eq!(storage.running.count(), 0);
        assert!(!exec.is_executing());
        assert!(exec.current_task().is_none());
    }

    // ── execute: validation rejection ───────────────────────────────

    #[tokio::test]
    async fn blank_prompt_is_rejected_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let backend = ScriptedBackend::succeeding("unused");
        let exec = executor(storage.clone(), backend.clone());

        let task = Task::new("   ");
        let result = exec.execute(task.clone()).await;

        assert!(!result.success);
        let stored = storage.history.get(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retries, 0);
        assert_eq!(backend.runs_started(), 0, "agent must not be invoked");
        assert_eq!(storage.queue.count(), 0);
    }

    #[tokio::test]
    async fn timeout_bounds_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let exec = executor(storage.clone(), ScriptedBackend::succeeding("x"));

        for bad in [999u64, 3_600_001] {
            let mut task = Task::new("p");
            task.timeout_ms = bad;
            assert!(!exec.execute(task).await.success, "{bad} should reject");
        }
        for good in [1_000u64, 3_600_000] {
            let mut task = Task::new("p");
            task.timeout_ms = good;
            assert!(exec.execute(task).await.success, "{good} should pass");
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let exec = executor(storage.clone(), ScriptedBackend::succeeding("x"));

        let mut task = Task::new("p");
        task.allowed_tools = Some(vec!["Read".into(), "Rocket".into()]);
        let result = exec.execute(task.clone()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Rocket"));
    }

    // ── execute: retry then fail ────────────────────────────────────

    #[tokio::test]
    async fn retryable_failure_walks_back_to_queue_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let exec = executor(
            storage.clone(),
            ScriptedBackend::failing("rate limit exceeded"),
        );

        let task = Task::new("doomed");

        // Attempt 1: back to the queue with a retry hold.
        let result = exec.execute(task.clone()).await;
        assert!(!result.success);
        let queued = storage.queue.get(task.id).expect("re-queued");
        assert_eq!(queued.retries, 1);
        assert_eq!(queued.status, TaskStatus::Pending);
        assert!(queued.started_at.is_none());
        assert!(queued.earliest_run_at.unwrap() > Utc::now());

        // Attempt 2: one more trip through the queue.
        storage.queue.remove(task.id).await.unwrap();
        let result = exec.execute(queued).await;
        assert!(!result.success);
        let queued = storage.queue.get(task.id).expect("re-queued again");
        assert_eq!(queued.retries, 2);

        // Attempt 3: retries exhausted, lands in failed history.
        storage.queue.remove(task.id).await.unwrap();
        let result = exec.execute(queued).await;
        assert!(!result.success);

        let failed = storage.history.get(task.id).expect("in failed history");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retries, 2);
        assert!(failed.error.as_ref().unwrap().contains("rate limit"));
        let errors = failed.result.as_ref().unwrap()["errors"]
            .as_array()
            .unwrap()
            .clone();
        assert!(errors.len() >= 3, "one record per attempt, got {}", errors.len());
        assert_eq!(storage.queue.count(), 0);
        assert_eq!(storage.running.count(), 0);
    }

    #[tokio::test]
    async fn validation_style_agent_error_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let exec = executor(
            storage.clone(),
            ScriptedBackend::failing("workspace not found"),
        );

        let task = Task::new("p");
        let result = exec.execute(task.clone()).await;
        assert!(!result.success);

        // Non-retryable classification: straight to failed history.
        assert!(storage.queue.get(task.id).is_none());
        let failed = storage.history.get(task.id).unwrap();
        assert_eq!(failed.retries, 0);
        assert_eq!(failed.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn deadline_expiry_is_classified_as_timeout_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        // A stream that never completes.
        let backend = ScriptedBackend::new(vec![Script::PauseAfter {
            events: vec![AgentEvent::Text {
                content: "working...".into(),
            }],
            after_resume: vec![],
        }]);
        let exec = executor(storage.clone(), backend);

        let mut task = Task::new("slow");
        task.timeout_ms = 1_000;
        let result = exec.execute(task.clone()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timeout"));
        let queued = storage.queue.get(task.id).expect("timeout is retryable");
        assert_eq!(queued.retries, 1);
    }

    #[tokio::test]
    async fn adapter_declared_permanent_failure_skips_retry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        // The message alone would classify as retryable Transient; the
        // adapter's permanent flag overrides the keyword heuristics.
        let exec = executor(
            storage.clone(),
            ScriptedBackend::failing_permanently("agent gave up on the task"),
        );

        let task = Task::new("p");
        let result = exec.execute(task.clone()).await;
        assert!(!result.success);

        assert!(storage.queue.get(task.id).is_none(), "must not re-queue");
        let failed = storage.history.get(task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retries, 0);
        let errors = failed.result.as_ref().unwrap()["errors"].as_array().unwrap();
        assert_eq!(errors[0]["type"], "permanent");
        assert_eq!(errors[0]["retryable"], false);
    }

    #[tokio::test]
    async fn cancel_current_terminalises_task_as_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        // A stream that never completes until cancelled.
        let backend = ScriptedBackend::new(vec![Script::PauseAfter {
            events: vec![AgentEvent::Text {
                content: "working...".into(),
            }],
            after_resume: vec![],
        }]);
        let exec = Arc::new(executor(storage.clone(), backend));

        let task = Task::new("long running");
        let task_id = task.id;

        // Cancelling before anything runs is a no-op.
        assert!(!exec.cancel_current(task_id));

        let run = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(task).await })
        };
        for _ in 0..100 {
            if exec.is_executing() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(exec.is_executing());

        // A different id is refused; the real one fires the signal.
        assert!(!exec.cancel_current(Uuid::new_v4()));
        assert!(exec.cancel_current(task_id));

        let result = run.await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled by user"));

        let stored = storage.history.get(task_id).unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert_eq!(stored.retries, 0, "cancellation is never retried");
        assert!(stored.finished_at.is_some());
        let errors = stored.result.as_ref().unwrap()["errors"].as_array().unwrap();
        assert_eq!(errors[0]["type"], "user_cancel");
        assert_eq!(storage.queue.count(), 0);
        assert_eq!(storage.running.count(), 0);
        assert!(!exec.is_executing());
        assert!(exec.current_task().is_none());
    }

    #[tokio::test]
    async fn spawn_error_is_classified_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let exec = executor(
            storage.clone(),
            ScriptedBackend::new(vec![Script::SpawnError("agent: binary not found".into())]),
        );

        let task = Task::new("p");
        let result = exec.execute(task.clone()).await;
        assert!(!result.success);
        // "not found" classifies as validation: no retry.
        let failed = storage.history.get(task.id).unwrap();
        assert_eq!(failed.retries, 0);
    }

    // ── error record accumulation ───────────────────────────────────

    #[test]
    fn append_error_record_accumulates() {
        let mut task = Task::new("p");
        let record = ExecutionError::new(
            ErrorType::Transient,
            "first",
            serde_json::json!({}),
        );
        append_error_record(&mut task, &record);
        let record = ExecutionError::new(ErrorType::Timeout, "second", serde_json::json!({}));
        append_error_record(&mut task, &record);

        let errors = task.result.as_ref().unwrap()["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["message"], "first");
        assert_eq!(errors[1]["type"], "timeout");
        assert_eq!(errors[1]["retryable"], true);
    }
}
