//! Scripted in-memory backend for tests and dry runs.
//!
//! Plays back a fixed list of events per invocation and records every
//! injected tool result, so executor and session tests can assert on the
//! full interaction without a real agent process.

use std::collections::VecDeque;
use std::sync::Arc;

use ar_domain::stream::AgentEvent;
use ar_domain::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{AgentBackend, AgentControl, AgentOptions, AgentRun};

/// One scripted invocation.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit these events, then end the stream.
    Events(Vec<AgentEvent>),
    /// Fail to start at all.
    SpawnError(String),
    /// Emit these events, then keep the stream open until cancelled or the
    /// next tool result is injected (at which point `after_resume` plays).
    PauseAfter {
        events: Vec<AgentEvent>,
        after_resume: Vec<AgentEvent>,
    },
}

/// A record of one `inject_tool_result` call.
#[derive(Debug, Clone)]
pub struct Injection {
    pub tool_use_id: String,
    pub content: serde_json::Value,
}

#[derive(Default)]
struct ScriptedState {
    scripts: VecDeque<Script>,
    injections: Vec<Injection>,
    runs_started: usize,
    cancelled: bool,
}

/// Backend that plays scripts in order; the last script repeats if more
/// runs are requested than scripted.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptedState {
                scripts: scripts.into(),
                ..Default::default()
            })),
        }
    }

    /// Convenience: a backend that always succeeds with the given text.
    pub fn succeeding(text: &str) -> Self {
        Self::new(vec![Script::Events(vec![
            AgentEvent::Text {
                content: text.to_string(),
            },
            AgentEvent::Complete {
                session_id: Some("scripted-session".into()),
                cost_usd: Some(0.001),
                duration_ms: Some(42),
                is_error: false,
            },
        ])])
    }

    /// Convenience: a backend whose runs always fail with the given message.
    pub fn failing(message: &str) -> Self {
        Self::new(vec![Script::Events(vec![AgentEvent::Error {
            message: message.to_string(),
            permanent: false,
        }])])
    }

    /// Convenience: a backend that declares its failure permanent, the way
    /// an adapter flags an unretryable error.
    pub fn failing_permanently(message: &str) -> Self {
        Self::new(vec![Script::Events(vec![AgentEvent::Error {
            message: message.to_string(),
            permanent: true,
        }])])
    }

    pub fn injections(&self) -> Vec<Injection> {
        self.state.lock().injections.clone()
    }

    pub fn runs_started(&self) -> usize {
        self.state.lock().runs_started
    }

    pub fn was_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

#[async_trait::async_trait]
impl AgentBackend for ScriptedBackend {
    async fn run(&self, _prompt: &str, _options: AgentOptions) -> Result<AgentRun> {
        let script = {
            let mut state = self.state.lock();
            state.runs_started += 1;
            if state.scripts.len() > 1 {
                state.scripts.pop_front()
            } else {
                state.scripts.front().cloned()
            }
        }
        .unwrap_or(Script::Events(Vec::new()));

        match script {
            Script::SpawnError(message) => Err(Error::Agent(message)),
            Script::Events(events) => {
                let (tx, rx) = mpsc::channel(64);
                tokio::spawn(async move {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(AgentRun {
                    events: rx,
                    control: Arc::new(ScriptedControl {
                        state: self.state.clone(),
                        resume: Mutex::new(None),
                    }),
                })
            }
            Script::PauseAfter {
                events,
                after_resume,
            } => {
                let (tx, rx) = mpsc::channel(64);
                let (resume_tx, resume_rx) = mpsc::channel::<()>(1);
                let control = Arc::new(ScriptedControl {
                    state: self.state.clone(),
                    resume: Mutex::new(Some(resume_tx)),
                });
                tokio::spawn(async move {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    // Hold the stream open until resumed or dropped.
                    let mut resume_rx = resume_rx;
                    if resume_rx.recv().await.is_some() {
                        for event in after_resume {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                });
                Ok(AgentRun {
                    events: rx,
                    control,
                })
            }
        }
    }
}

struct ScriptedControl {
    state: Arc<Mutex<ScriptedState>>,
    resume: Mutex<Option<mpsc::Sender<()>>>,
}

#[async_trait::async_trait]
impl AgentControl for ScriptedControl {
    async fn inject_tool_result(
        &self,
        tool_use_id: &str,
        content: serde_json::Value,
    ) -> Result<bool> {
        self.state.lock().injections.push(Injection {
            tool_use_id: tool_use_id.to_string(),
            content,
        });
        let sender = self.resume.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
        Ok(true)
    }

    async fn cancel(&self) {
        self.state.lock().cancelled = true;
        // Dropping the resume sender ends a paused stream.
        self.resume.lock().take();
    }
}
