//! Process-backed agent adapter.
//!
//! Spawns the agent CLI with `--output-format stream-json` and translates
//! its stdout JSONL into [`AgentEvent`]s. Tool results are injected by
//! writing stream-json user messages to the child's stdin, which is how the
//! stream resumes after an interactive pause.

use std::process::Stdio;
use std::sync::Arc;

use ar_domain::stream::AgentEvent;
use ar_domain::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

use crate::{AgentBackend, AgentControl, AgentOptions, AgentRun};

/// Event channel depth; the consumer applies its own backpressure.
const EVENT_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClaudeCliBackend {
    binary: String,
}

impl ClaudeCliBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl AgentBackend for ClaudeCliBackend {
    async fn run(&self, prompt: &str, options: AgentOptions) -> Result<AgentRun> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--permission-mode")
            .arg(options.permission_mode.as_str())
            .current_dir(&options.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // The agent refuses to nest inside another agent session; the child
        // gets a clean environment marker while our own stays untouched.
        cmd.env_remove("CLAUDECODE");

        if let Some(tools) = &options.allowed_tools {
            cmd.arg("--allowed-tools").arg(tools.join(","));
        }
        if options.continue_conversation {
            cmd.arg("--continue");
        }
        if let Some(session_id) = &options.resume_session_id {
            cmd.arg("--resume").arg(session_id);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Agent(format!("failed to spawn {}: {e}", self.binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Agent("agent child has no stdout".into()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Agent("agent child has no stdin".into()))?;

        // Send the task prompt as the opening user message.
        let opening = user_text_message(prompt);
        stdin
            .write_all(format!("{opening}\n").as_bytes())
            .await
            .map_err(|e| Error::Agent(format!("failed to send prompt: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Agent(format!("failed to flush prompt: {e}")))?;

        let control = Arc::new(ClaudeCliControl {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
        });

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(read_events(stdout, tx, control.clone()));

        Ok(AgentRun {
            events: rx,
            control,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ClaudeCliControl {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

#[async_trait::async_trait]
impl AgentControl for ClaudeCliControl {
    async fn inject_tool_result(
        &self,
        tool_use_id: &str,
        content: serde_json::Value,
    ) -> Result<bool> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Ok(false);
        };

        let message = tool_result_message(tool_use_id, &content);
        if let Err(e) = stdin.write_all(format!("{message}\n").as_bytes()).await {
            tracing::warn!(error = %e, "tool result injection failed; stream closed");
            *guard = None;
            return Ok(false);
        }
        stdin
            .flush()
            .await
            .map_err(|e| Error::Agent(format!("failed to flush tool result: {e}")))?;
        Ok(true)
    }

    async fn cancel(&self) {
        // Dropping stdin first gives the agent a chance to exit cleanly.
        self.stdin.lock().await.take();
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "agent child already gone");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_events(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<AgentEvent>,
    control: Arc<ClaudeCliControl>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut saw_terminal = false;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                for event in translate_line(&line) {
                    saw_terminal |= event.is_terminal();
                    if tx.send(event).await.is_err() {
                        // Consumer went away; stop the child and bail.
                        control.cancel().await;
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx
                    .send(AgentEvent::Error {
                        message: format!("agent stream read error: {e}"),
                        permanent: false,
                    })
                    .await;
                saw_terminal = true;
                break;
            }
        }
    }

    // Reap the child and surface an abnormal exit if the stream never
    // delivered a terminal event.
    let status = {
        let mut guard = control.child.lock().await;
        match guard.as_mut() {
            Some(child) => child.wait().await.ok(),
            None => None,
        }
    };

    if !saw_terminal {
        let message = match status {
            Some(status) if !status.success() => {
                format!("agent exited abnormally: {status}")
            }
            _ => "agent stream ended without a result".to_string(),
        };
        let _ = tx
            .send(AgentEvent::Error {
                message,
                permanent: false,
            })
            .await;
    }
}

/// Translate one stream-json line into zero or more events.
///
/// Unknown message kinds are ignored rather than failing the stream; the
/// agent wire format grows fields over time.
pub fn translate_line(line: &str) -> Vec<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        tracing::debug!(line, "skipping non-JSON agent output");
        return Vec::new();
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => {
            let mut events = Vec::new();
            let blocks = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(AgentEvent::Text {
                                    content: text.to_string(),
                                });
                            }
                        }
                    }
                    Some("thinking") => {
                        if let Some(text) = block.get("thinking").and_then(|t| t.as_str()) {
                            events.push(AgentEvent::Thinking {
                                content: text.to_string(),
                            });
                        }
                    }
                    Some("tool_use") => {
                        events.push(AgentEvent::ToolUse {
                            tool_use_id: block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            tool_name: block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            tool_input: block.get("input").cloned().unwrap_or_default(),
                        });
                    }
                    _ => {}
                }
            }
            events
        }
        Some("user") => {
            // Tool results echo back through user messages.
            let mut events = Vec::new();
            let blocks = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            for block in blocks {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_result") {
                    events.push(AgentEvent::ToolResult {
                        tool_use_id: block
                            .get("tool_use_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        content: render_tool_result_content(block.get("content")),
                        is_error: block
                            .get("is_error")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                    });
                }
            }
            events
        }
        Some("result") => {
            vec![AgentEvent::Complete {
                session_id: value
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                cost_usd: value.get("total_cost_usd").and_then(|v| v.as_f64()),
                duration_ms: value.get("duration_ms").and_then(|v| v.as_u64()),
                is_error: value
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            }]
        }
        // Init/system banners carry no task-visible information.
        _ => Vec::new(),
    }
}

fn render_tool_result_content(content: Option<&serde_json::Value>) -> String {
    match content {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ── wire message construction ───────────────────────────────────────

fn user_text_message(text: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{"type": "text", "text": text}],
        },
    })
    .to_string()
}

fn tool_result_message(tool_use_id: &str, content: &serde_json::Value) -> String {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            }],
        },
    })
    .to_string()
}
