use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigSeverity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Global cap on simultaneously pending questions across all sessions.
    /// Further questions queue behind a "system busy" notice.
    #[serde(default = "d_max_pending_questions")]
    pub max_pending_questions: usize,
    /// Applied when a question omits `timeout_seconds`.
    #[serde(default = "d_question_timeout")]
    pub question_timeout_secs: u64,
    /// Sessions older than this are swept away.
    #[serde(default = "d_max_session_age")]
    pub max_session_age_secs: u64,
    /// Sweeper cadence.
    #[serde(default = "d_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_pending_questions: d_max_pending_questions(),
            question_timeout_secs: d_question_timeout(),
            max_session_age_secs: d_max_session_age(),
            cleanup_interval_secs: d_cleanup_interval(),
        }
    }
}

impl SessionsConfig {
    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs(self.max_session_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self, issues: &mut Vec<ConfigError>) {
        if self.max_pending_questions == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.max_pending_questions".into(),
                message: "must be at least 1".into(),
            });
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_pending_questions() -> usize {
    5
}
fn d_question_timeout() -> u64 {
    300
}
fn d_max_session_age() -> u64 {
    14_400 // 4 hours
}
fn d_cleanup_interval() -> u64 {
    600
}
