//! Agent Adapter — the one boundary onto the external coding-agent runtime.
//!
//! The rest of the system sees agents through two traits: [`AgentBackend`]
//! starts an invocation and returns an [`AgentRun`] (an event receiver plus
//! a control handle); [`AgentControl`] injects tool results back into a live
//! stream and cancels it. The production implementation drives the agent
//! CLI as a child process speaking stream-json on stdin/stdout.

pub mod claude;
pub mod outcome;
pub mod scripted;

use std::path::PathBuf;
use std::sync::Arc;

use ar_domain::config::PermissionMode;
use ar_domain::stream::AgentEvent;
use ar_domain::Result;
use tokio::sync::mpsc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation agent options.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Working directory for the agent process.
    pub workspace: PathBuf,
    /// Restrict the agent to these tools. `None` grants the default set.
    pub allowed_tools: Option<Vec<String>>,
    pub permission_mode: PermissionMode,
    /// Continue the most recent conversation in this workspace.
    pub continue_conversation: bool,
    /// Resume a specific agent session by id.
    pub resume_session_id: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            allowed_tools: None,
            permission_mode: PermissionMode::Default,
            continue_conversation: false,
            resume_session_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live agent invocation: events arrive on `events` in production order;
/// `control` lets the owner resume or terminate the stream.
pub struct AgentRun {
    pub events: mpsc::Receiver<AgentEvent>,
    pub control: Arc<dyn AgentControl>,
}

impl std::fmt::Debug for AgentRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRun").finish_non_exhaustive()
    }
}

/// Control surface of a live invocation.
#[async_trait::async_trait]
pub trait AgentControl: Send + Sync {
    /// Resume the stream with a tool-result message bound to a previously
    /// emitted tool call. Returns `true` if the stream accepted it.
    async fn inject_tool_result(
        &self,
        tool_use_id: &str,
        content: serde_json::Value,
    ) -> Result<bool>;

    /// Terminate the stream. Idempotent.
    async fn cancel(&self);
}

/// Factory for agent invocations.
#[async_trait::async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, prompt: &str, options: AgentOptions) -> Result<AgentRun>;
}
