use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Permission handling of the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl Default for PermissionMode {
    fn default() -> Self {
        Self::Default
    }
}

impl PermissionMode {
    /// The flag value understood by the agent CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The coding-agent binary invoked per task/stream.
    #[serde(default = "d_binary")]
    pub binary: String,
    /// Permission mode used when a task does not set `auto_approve`.
    #[serde(default)]
    pub default_permission_mode: PermissionMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: d_binary(),
            default_permission_mode: PermissionMode::Default,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_binary() -> String {
    "claude".into()
}
