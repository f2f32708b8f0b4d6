use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::question::Question;

/// A boxed async stream, used for agent event sequences.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while an agent invocation runs (adapter-agnostic).
///
/// The session manager forwards these to streaming clients one JSON record
/// per event; the executor folds them into a task outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A chunk of assistant text.
    Text { content: String },

    /// The agent invoked a tool.
    ToolUse {
        tool_use_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
    },

    /// A tool produced a result.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Extended thinking output.
    Thinking { content: String },

    /// The run failed; no further events follow. An adapter sets
    /// `permanent` to declare the failure unretryable.
    Error {
        message: String,
        #[serde(default)]
        permanent: bool,
    },

    /// The run finished; carries completion metadata.
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default)]
        is_error: bool,
    },

    /// The agent asked the user a question and the stream is suspended
    /// until an answer is submitted (or the question times out).
    ///
    /// Produced by the session manager, never by the adapter itself.
    AskUserQuestion { question: Question },
}

impl AgentEvent {
    /// True for events that terminate a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Error { .. } | AgentEvent::Complete { .. })
    }
}

/// Registry of adapter tool names that map to interactive event kinds.
///
/// The agent signals "ask the user" with an ordinary tool call; the session
/// manager recognises it by name (case-insensitive) rather than string
/// comparisons scattered through the stream loop.
pub const ASK_USER_QUESTION_TOOL: &str = "ask_user_question";

/// Does this tool call suspend the stream for user input?
pub fn is_interactive_tool(tool_name: &str) -> bool {
    tool_name.eq_ignore_ascii_case(ASK_USER_QUESTION_TOOL)
}
