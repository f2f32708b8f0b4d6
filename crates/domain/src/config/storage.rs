use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigSeverity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the JSON-on-disk task store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the five collection files. Owned exclusively by
    /// one process (enforced by a PID lock at startup).
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// Completed/failed history caps (newest-first, tail truncated).
    #[serde(default = "d_max_history")]
    pub max_history: usize,
    /// Give up acquiring a file lock after this long.
    #[serde(default = "d_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Interval between lock acquisition attempts.
    #[serde(default = "d_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            max_history: d_max_history(),
            lock_timeout_ms: d_lock_timeout_ms(),
            lock_retry_interval_ms: d_lock_retry_interval_ms(),
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn validate(&self, issues: &mut Vec<ConfigError>) {
        if self.max_history == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "storage.max_history".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.lock_retry_interval_ms == 0 || self.lock_retry_interval_ms > self.lock_timeout_ms {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "storage.lock_retry_interval_ms".into(),
                message: "must be nonzero and below lock_timeout_ms".into(),
            });
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn d_max_history() -> usize {
    1_000
}
fn d_lock_timeout_ms() -> u64 {
    5_000
}
fn d_lock_retry_interval_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.max_history, 1_000);
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.lock_retry_interval(), Duration::from_millis(100));
    }

    #[test]
    fn zero_history_is_an_error() {
        let cfg = StorageConfig {
            max_history: 0,
            ..Default::default()
        };
        let mut issues = Vec::new();
        cfg.validate(&mut issues);
        assert!(issues.iter().any(|i| i.field == "storage.max_history"));
    }

    #[test]
    fn retry_interval_must_fit_in_timeout() {
        let cfg = StorageConfig {
            lock_retry_interval_ms: 10_000,
            ..Default::default()
        };
        let mut issues = Vec::new();
        cfg.validate(&mut issues);
        assert!(!issues.is_empty());
    }
}
