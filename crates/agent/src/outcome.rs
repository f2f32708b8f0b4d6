//! Folding a run's event stream into a single task outcome.

use ar_domain::stream::AgentEvent;

use crate::AgentRun;

/// Tools whose invocation counts as a file modification.
const FILE_MUTATING_TOOLS: &[&str] = &["Write", "Edit", "NotebookEdit"];

/// The collected result of driving one agent invocation to completion.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub success: bool,
    /// Concatenated assistant text.
    pub message: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub files_changed: Vec<String>,
    pub tools_used: Vec<String>,
    /// The adapter declared this failure unretryable.
    pub permanent: bool,
}

/// Drain a run to completion, tracking tool usage and file changes along
/// the way. Returns when the stream ends; an `Error` event or an
/// `is_error` completion marks the outcome failed.
pub async fn collect_run(mut run: AgentRun) -> AgentOutcome {
    let mut outcome = AgentOutcome::default();
    let mut texts: Vec<String> = Vec::new();
    let mut is_error = false;
    let mut completed = false;

    while let Some(event) = run.events.recv().await {
        match event {
            AgentEvent::Text { content } => texts.push(content),
            AgentEvent::ToolUse {
                tool_name,
                tool_input,
                ..
            } => {
                if !outcome.tools_used.contains(&tool_name) {
                    outcome.tools_used.push(tool_name.clone());
                }
                if FILE_MUTATING_TOOLS.contains(&tool_name.as_str()) {
                    if let Some(path) = tool_input.get("file_path").and_then(|p| p.as_str()) {
                        if !path.is_empty() && !outcome.files_changed.contains(&path.to_string()) {
                            outcome.files_changed.push(path.to_string());
                        }
                    }
                }
            }
            AgentEvent::Complete {
                session_id,
                cost_usd,
                duration_ms,
                is_error: err,
            } => {
                outcome.session_id = session_id;
                outcome.cost_usd = cost_usd;
                outcome.duration_ms = duration_ms;
                is_error |= err;
                completed = true;
            }
            AgentEvent::Error { message, permanent } => {
                is_error = true;
                outcome.permanent |= permanent;
                texts.push(message);
            }
            AgentEvent::ToolResult { .. }
            | AgentEvent::Thinking { .. }
            | AgentEvent::AskUserQuestion { .. } => {}
        }
    }

    outcome.message = texts.join("");
    outcome.success = completed && !is_error;
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ar_domain::Result;
    use tokio::sync::mpsc;

    use super::*;
    use crate::AgentControl;

    struct NoopControl;

    #[async_trait::async_trait]
    impl AgentControl for NoopControl {
        async fn inject_tool_result(&self, _: &str, _: serde_json::Value) -> Result<bool> {
            Ok(true)
        }
        async fn cancel(&self) {}
    }

    fn run_with(events: Vec<AgentEvent>) -> AgentRun {
        let (tx, rx) = mpsc::channel(16);
        for event in events {
            tx.try_send(event).unwrap();
        }
        drop(tx);
        AgentRun {
            events: rx,
            control: Arc::new(NoopControl),
        }
    }

    #[tokio::test]
    async fn successful_run_collects_text_and_metadata() {
        let run = run_with(vec![
            AgentEvent::Text {
                content: "hello ".into(),
            },
            AgentEvent::Text {
                content: "world".into(),
            },
            AgentEvent::Complete {
                session_id: Some("s1".into()),
                cost_usd: Some(0.01),
                duration_ms: Some(500),
                is_error: false,
            },
        ]);
        let outcome = collect_run(run).await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "hello world");
        assert_eq!(outcome.session_id.as_deref(), Some("s1"));
        assert_eq!(outcome.cost_usd, Some(0.01));
        assert_eq!(outcome.duration_ms, Some(500));
    }

    #[tokio::test]
    async fn tool_tracking_dedupes_and_finds_file_paths() {
        let run = run_with(vec![
            AgentEvent::ToolUse {
                tool_use_id: "t1".into(),
                tool_name: "Bash".into(),
                tool_input: serde_json::json!({"command": "ls"}),
            },
            AgentEvent::ToolUse {
                tool_use_id: "t2".into(),
                tool_name: "Write".into(),
                tool_input: serde_json::json!({"file_path": "src/a.rs"}),
            },
            AgentEvent::ToolUse {
                tool_use_id: "t3".into(),
                tool_name: "Bash".into(),
                tool_input: serde_json::json!({"command": "pwd"}),
            },
            AgentEvent::ToolUse {
                tool_use_id: "t4".into(),
                tool_name: "Edit".into(),
                tool_input: serde_json::json!({"file_path": "src/a.rs"}),
            },
            AgentEvent::Complete {
                session_id: None,
                cost_usd: None,
                duration_ms: None,
                is_error: false,
            },
        ]);
        let outcome = collect_run(run).await;
        assert_eq!(outcome.tools_used, vec!["Bash", "Write", "Edit"]);
        assert_eq!(outcome.files_changed, vec!["src/a.rs"]);
    }

    #[tokio::test]
    async fn error_event_marks_failure() {
        let run = run_with(vec![
            AgentEvent::Text {
                content: "partial".into(),
            },
            AgentEvent::Error {
                message: " boom".into(),
                permanent: false,
            },
        ]);
        let outcome = collect_run(run).await;
        assert!(!outcome.success);
        assert!(!outcome.permanent);
        assert_eq!(outcome.message, "partial boom");
    }

    #[tokio::test]
    async fn permanent_error_flag_propagates() {
        let run = run_with(vec![AgentEvent::Error {
            message: "model refused the task".into(),
            permanent: true,
        }]);
        let outcome = collect_run(run).await;
        assert!(!outcome.success);
        assert!(outcome.permanent);
    }

    #[tokio::test]
    async fn stream_without_completion_is_failure() {
        let run = run_with(vec![AgentEvent::Text {
            content: "went away".into(),
        }]);
        let outcome = collect_run(run).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn error_completion_is_failure() {
        let run = run_with(vec![AgentEvent::Complete {
            session_id: None,
            cost_usd: Some(0.002),
            duration_ms: Some(10),
            is_error: true,
        }]);
        let outcome = collect_run(run).await;
        assert!(!outcome.success);
        assert_eq!(outcome.cost_usd, Some(0.002));
    }
}
