use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigSeverity};
use crate::task::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Retryable failures are re-queued at most this many times.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Applied when a task omits `timeout_ms`.
    #[serde(default = "d_default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "d_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            default_timeout_ms: d_default_timeout_ms(),
            min_timeout_ms: d_min_timeout_ms(),
            max_timeout_ms: d_max_timeout_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self, issues: &mut Vec<ConfigError>) {
        if self.min_timeout_ms > self.max_timeout_ms {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "executor.min_timeout_ms".into(),
                message: "exceeds max_timeout_ms".into(),
            });
        }
        if self.default_timeout_ms < self.min_timeout_ms
            || self.default_timeout_ms > self.max_timeout_ms
        {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "executor.default_timeout_ms".into(),
                message: "outside the [min_timeout_ms, max_timeout_ms] range".into(),
            });
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_retries() -> u32 {
    2
}
fn d_default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn d_min_timeout_ms() -> u64 {
    MIN_TIMEOUT_MS
}
fn d_max_timeout_ms() -> u64 {
    MAX_TIMEOUT_MS
}
