//! Task data model — one-shot tasks, cron-driven scheduled tasks, and the
//! pagination envelope used by history reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const MAX_PROMPT_LENGTH: usize = 10_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

fn default_workspace() -> String {
    ".".into()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_created_at() -> DateTime<Utc> {
    // Legacy rows without a created_at are backfilled at read time.
    Utc::now()
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

/// A one-shot unit of work executed by the agent.
///
/// A task lives in exactly one storage collection at a time (queue, running,
/// completed history, or failed history); transitions move it atomically.
/// Unknown fields in persisted rows are tolerated for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub prompt: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    /// True when this task was materialised from a cron definition.
    #[serde(default)]
    pub scheduled: bool,
    #[serde(default)]
    pub scheduled_id: Option<Uuid>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Retry hold: the scheduler must not dispatch before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_run_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            workspace: default_workspace(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auto_approve: false,
            allowed_tools: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retries: 0,
            status: TaskStatus::Pending,
            scheduled: false,
            scheduled_id: None,
            result: None,
            error: None,
            files_changed: Vec::new(),
            tools_used: Vec::new(),
            cost_usd: None,
            duration_ms: None,
            earliest_run_at: None,
        }
    }

    /// Materialise a queue task from a cron definition, copying the
    /// execution parameters and recording provenance.
    pub fn from_scheduled(scheduled: &ScheduledTask) -> Self {
        let mut task = Self::new(scheduled.prompt.clone());
        task.workspace = scheduled.workspace.clone();
        task.timeout_ms = scheduled.timeout_ms;
        task.auto_approve = scheduled.auto_approve;
        task.allowed_tools = scheduled.allowed_tools.clone();
        task.scheduled = true;
        task.scheduled_id = Some(scheduled.id);
        task
    }

    /// Reset execution state for a retry: back to Pending with cleared
    /// timestamps. The caller increments `retries` and re-queues.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.finished_at = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScheduledTask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const MAX_NAME_LENGTH: usize = 100;

fn default_timezone() -> String {
    "UTC".into()
}

fn default_enabled() -> bool {
    true
}

/// A cron-driven template that emits [`Task`]s when due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    pub prompt: String,
    /// Cron expression: 5-field (min hour dom month dow) or 6-field
    /// (seconds prepended). Aliases like `@daily` are accepted.
    pub cron: String,
    /// IANA timezone the cron expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// Next fire time (UTC). Always `None` while disabled.
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default = "default_created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_created_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_count: u64,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, cron: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            prompt: prompt.into(),
            cron: cron.into(),
            timezone: default_timezone(),
            workspace: default_workspace(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auto_approve: false,
            allowed_tools: None,
            enabled: true,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
            run_count: 0,
        }
    }
}

/// Names may contain word characters, CJK ideographs, dashes and spaces.
pub fn is_valid_name(name: &str) -> bool {
    use std::sync::OnceLock;
    static NAME_PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = NAME_PATTERN
        .get_or_init(|| regex::Regex::new(r"^[\w\u{4e00}-\u{9fff}\- ]+$").expect("valid pattern"));
    name.chars().count() <= MAX_NAME_LENGTH && pattern.is_match(name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pagination
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

impl<T> PaginatedResponse<T> {
    /// Slice one page out of a full newest-first list.
    pub fn paginate(all: Vec<T>, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total = all.len();
        let pages = if total == 0 { 1 } else { total.div_ceil(limit) };
        let offset = (page - 1) * limit;
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            page,
            limit,
            pages,
        }
    }
}
