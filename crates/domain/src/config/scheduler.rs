use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigSeverity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "d_poll_interval")]
    pub poll_interval_secs: u64,
    /// Start the scheduler loop automatically at boot.
    #[serde(default = "d_true")]
    pub auto_start: bool,
    /// Bounded wait for in-flight work during shutdown.
    #[serde(default = "d_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: d_poll_interval(),
            auto_start: true,
            shutdown_grace_secs: d_shutdown_grace(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn validate(&self, issues: &mut Vec<ConfigError>) {
        if self.poll_interval_secs == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.poll_interval_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.poll_interval_secs > 300 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "scheduler.poll_interval_secs".into(),
                message: "over 5 minutes; cron fire times will drift late".into(),
            });
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_poll_interval() -> u64 {
    10
}
fn d_shutdown_grace() -> u64 {
    5
}
fn d_true() -> bool {
    true
}
