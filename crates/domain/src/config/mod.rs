mod agent;
mod executor;
mod scheduler;
mod server;
mod sessions;
mod storage;
mod workspace;

pub use agent::*;
pub use executor::*;
pub use scheduler::*;
pub use server::*;
pub use sessions::*;
pub use storage::*;
pub use workspace::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

impl Config {
    /// Load configuration from a TOML file if it exists, then apply
    /// environment overrides. A missing file yields pure defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("WORKING_DIR") {
            if !dir.is_empty() {
                self.workspace.root = dir.into();
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_ALLOW_ANY_WORKSPACE") {
            self.workspace.allow_any = v.eq_ignore_ascii_case("true");
        }
        if let Ok(dir) = std::env::var("AR_DATA_DIR") {
            if !dir.is_empty() {
                self.storage.data_dir = dir.into();
            }
        }
        if let Ok(port) = std::env::var("AR_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    /// Validate the whole configuration, returning every issue found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();
        self.executor.validate(&mut issues);
        self.scheduler.validate(&mut issues);
        self.sessions.validate(&mut issues);
        self.storage.validate(&mut issues);
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
