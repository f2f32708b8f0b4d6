//! Session registry and the suspend/resume event loop.
//!
//! One session per live client stream. The event loop forwards adapter
//! events to the client until it sees an `ask_user_question` tool call;
//! then it parks on a one-shot answer signal that `submit_answer` fires
//! from the HTTP side. The signal is registered *before* the question
//! event is yielded, so an answer submitted the instant the client sees
//! the question can never race the suspension and get lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ar_agent::{AgentBackend, AgentControl, AgentOptions};
use ar_domain::config::SessionsConfig;
use ar_domain::question::{sanitize_answer, Answer, Question};
use ar_domain::stream::{is_interactive_tool, AgentEvent};
use ar_domain::{Error, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::payload::{build_tool_result_payload, NO_ANSWER_MESSAGE};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request to open a streaming invocation.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub prompt: String,
    pub options: AgentOptions,
}

/// Client-visible session snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub is_waiting_answer: bool,
    pub pending_question_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

struct SessionEntry {
    control: Arc<dyn AgentControl>,
    is_waiting_answer: bool,
    pending_question_id: Option<String>,
    answer_tx: Option<oneshot::Sender<Answer>>,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Outcome of one wait on the adapter's event channel.
enum Step {
    Cancelled,
    Ended,
    Event(AgentEvent),
}

impl SessionEntry {
    fn status(&self, session_id: Uuid) -> SessionStatus {
        SessionStatus {
            session_id,
            is_waiting_answer: self.is_waiting_answer,
            pending_question_id: self.pending_question_id.clone(),
            created_at: self.created_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap to clone: the registry and question slots are shared behind Arcs.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
    /// Global cap on simultaneously pending questions.
    question_slots: Arc<Semaphore>,
    config: SessionsConfig,
}

impl SessionManager {
    pub fn new(config: SessionsConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            question_slots: Arc::new(Semaphore::new(config.max_pending_questions.max(1))),
            config,
        }
    }

    /// Start a streaming invocation. Returns the session id and the event
    /// sequence to forward to the client. The session is removed (and the
    /// agent cancelled) when the stream ends for any reason, including the
    /// client dropping the connection mid-stream.
    pub async fn open_stream(
        &self,
        backend: Arc<dyn AgentBackend>,
        request: StreamRequest,
    ) -> Result<(Uuid, impl futures_core::Stream<Item = AgentEvent> + Send)> {
        let run = backend.run(&request.prompt, request.options).await?;
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(
                session_id,
                SessionEntry {
                    control: run.control.clone(),
                    is_waiting_answer: false,
                    pending_question_id: None,
                    answer_tx: None,
                    created_at: Utc::now(),
                    cancel: cancel.clone(),
                },
            );
        }
        tracing::info!(session_id = %session_id, "stream session opened");

        let stream = self
            .clone()
            .event_loop(session_id, run.events, run.control, cancel);
        Ok((session_id, stream))
    }

    fn event_loop(
        self,
        session_id: Uuid,
        mut events: mpsc::Receiver<AgentEvent>,
        control: Arc<dyn AgentControl>,
        cancel: CancellationToken,
    ) -> impl futures_core::Stream<Item = AgentEvent> + Send {
        let manager = self;
        async_stream::stream! {
            // Cleanup must run whether the stream finishes or the client
            // disconnects mid-event; a drop guard covers both paths.
            let _guard = CleanupGuard {
                manager: manager.clone(),
                session_id,
            };

            loop {
                let step = tokio::select! {
                    _ = cancel.cancelled() => Step::Cancelled,
                    maybe = events.recv() => match maybe {
                        Some(event) => Step::Event(event),
                        None => Step::Ended,
                    },
                };
                let event = match step {
                    Step::Cancelled => {
                        yield AgentEvent::Error {
                            message: "session cancelled".into(),
                            permanent: false,
                        };
                        break;
                    }
                    Step::Ended => break,
                    Step::Event(event) => event,
                };

                match event {
                    AgentEvent::ToolUse {
                        tool_use_id,
                        tool_name,
                        tool_input,
                    } if is_interactive_tool(&tool_name) => {
                        let (question, salvaged) = Question::from_tool_input(&tool_input);
                        if salvaged {
                            yield AgentEvent::Text {
                                content: "Note: the agent's question payload was \
                                          incomplete; showing a simplified question."
                                    .into(),
                            };
                        }
                        if let Err(e) = question.validate_depth() {
                            yield AgentEvent::Text {
                                content: format!("Question rejected: {e}"),
                            };
                            let _ = control
                                .inject_tool_result(
                                    &tool_use_id,
                                    serde_json::Value::String(NO_ANSWER_MESSAGE.into()),
                                )
                                .await;
                            continue;
                        }

                        // Admission control: bounded number of questions may
                        // be pending across all sessions.
                        let permit = match manager.question_slots.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                yield AgentEvent::Text {
                                    content: "System busy: waiting for a question slot."
                                        .into(),
                                };
                                match manager.question_slots.clone().acquire_owned().await {
                                    Ok(permit) => permit,
                                    Err(_) => break,
                                }
                            }
                        };

                        // Register the answer signal BEFORE the client can
                        // see the question, so an immediate answer lands.
                        let Some(answer_rx) =
                            manager.begin_waiting(session_id, &question).await
                        else {
                            break;
                        };

                        yield AgentEvent::AskUserQuestion {
                            question: question.clone(),
                        };

                        let timeout = Duration::from_secs(
                            if question.timeout_seconds == 0 {
                                manager.config.question_timeout_secs
                            } else {
                                question.timeout_seconds
                            },
                        );

                        let answer = tokio::select! {
                            _ = cancel.cancelled() => None,
                            outcome = tokio::time::timeout(timeout, answer_rx) => {
                                match outcome {
                                    Ok(Ok(answer)) => Some(answer),
                                    // Timed out, or the session was torn
                                    // down under us.
                                    _ => None,
                                }
                            }
                        };

                        manager.clear_waiting(session_id).await;
                        drop(permit);

                        match answer {
                            Some(answer) => {
                                let content =
                                    build_tool_result_payload(&question, &answer);
                                tracing::info!(
                                    session_id = %session_id,
                                    question_id = %question.question_id,
                                    "answer received, resuming stream"
                                );
                                let _ = control
                                    .inject_tool_result(
                                        &tool_use_id,
                                        serde_json::Value::String(content),
                                    )
                                    .await;
                            }
                            None => {
                                tracing::info!(
                                    session_id = %session_id,
                                    question_id = %question.question_id,
                                    "question expired without an answer"
                                );
                                let _ = control
                                    .inject_tool_result(
                                        &tool_use_id,
                                        serde_json::Value::String(NO_ANSWER_MESSAGE.into()),
                                    )
                                    .await;
                            }
                        }

                        if cancel.is_cancelled() {
                            yield AgentEvent::Error {
                                message: "session cancelled".into(),
                                permanent: false,
                            };
                            break;
                        }
                    }
                    event => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Deliver an answer to a waiting session.
    ///
    /// A submission against a session that is not waiting, or with a
    /// question id other than the pending one, fails without disturbing
    /// the session.
    pub async fn submit_answer(&self, session_id: Uuid, mut answer: Answer) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        if !entry.is_waiting_answer {
            return Err(Error::SessionNotWaiting(session_id.to_string()));
        }
        let pending = entry.pending_question_id.clone().unwrap_or_default();
        if pending != answer.question_id {
            return Err(Error::QuestionIdMismatch {
                expected: pending,
                got: answer.question_id,
            });
        }

        let Some(tx) = entry.answer_tx.take() else {
            return Err(Error::SessionNotWaiting(session_id.to_string()));
        };

        sanitize_answer(&mut answer);
        tx.send(answer)
            .map_err(|_| Error::SessionNotWaiting(session_id.to_string()))
    }

    pub async fn get_status(&self, session_id: Uuid) -> Result<SessionStatus> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&session_id)
            .map(|entry| entry.status(session_id))
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub async fn list_sessions(&self) -> Vec<SessionStatus> {
        let sessions = self.sessions.lock().await;
        let mut list: Vec<SessionStatus> = sessions
            .iter()
            .map(|(id, entry)| entry.status(*id))
            .collect();
        list.sort_by_key(|s| s.created_at);
        list
    }

    /// Cancel a live session. Returns false if it does not exist.
    pub async fn cancel_session(&self, session_id: Uuid) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(&session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove sessions older than `max_age`, cancelling their agents.
    /// Returns how many were swept.
    pub async fn cleanup_expired(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(4));
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(entry) = sessions.remove(id) {
                entry.cancel.cancel();
                let control = entry.control;
                tokio::spawn(async move { control.cancel().await });
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "swept expired stream sessions");
        }
        expired.len()
    }

    /// Spawn the periodic expiry sweeper.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let interval = manager.config.cleanup_interval();
        let max_age = manager.config.max_session_age();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.cleanup_expired(max_age).await;
            }
        })
    }

    // ── internal ────────────────────────────────────────────────────

    /// Enter the waiting state and hand back the answer signal. `None`
    /// when the session has already been removed.
    async fn begin_waiting(
        &self,
        session_id: Uuid,
        question: &Question,
    ) -> Option<oneshot::Receiver<Answer>> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(&session_id)?;
        let (tx, rx) = oneshot::channel();
        entry.is_waiting_answer = true;
        entry.pending_question_id = Some(question.question_id.clone());
        entry.answer_tx = Some(tx);
        Some(rx)
    }

    async fn clear_waiting(&self, session_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.is_waiting_answer = false;
            entry.pending_question_id = None;
            entry.answer_tx = None;
        }
    }

    async fn remove_session(&self, session_id: Uuid) {
        let entry = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&session_id)
        };
        if let Some(entry) = entry {
            entry.cancel.cancel();
            entry.control.cancel().await;
            tracing::debug!(session_id = %session_id, "stream session removed");
        }
    }
}

/// Removes the session and stops the agent when the event stream is
/// dropped, whether it completed or the client disconnected.
struct CleanupGuard {
    manager: SessionManager,
    session_id: Uuid,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        let session_id = self.session_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                manager.remove_session(session_id).await;
            });
        }
    }
}
