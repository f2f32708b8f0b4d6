//! Interactive question/answer types used when the agent pauses a stream
//! to ask the user something.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub const DEFAULT_QUESTION_TIMEOUT_SECS: u64 = 300;
pub const MAX_ANSWER_LENGTH: usize = 1_000;
pub const MAX_OPTION_LABEL_LENGTH: usize = 100;
/// Follow-up questions may nest at most this deep.
pub const MAX_FOLLOW_UP_DEPTH: usize = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Question
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    Checkbox,
    Text,
    Boolean,
}

impl Default for QuestionType {
    fn default() -> Self {
        Self::MultipleChoice
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: bool,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_QUESTION_TIMEOUT_SECS
}

fn default_required() -> bool {
    true
}

/// An in-band interactive prompt requiring an answer before the agent
/// stream continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub text: String,
    #[serde(default, rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default)]
    pub min_selections: Option<u32>,
    #[serde(default)]
    pub max_selections: Option<u32>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Follow-ups keyed by parent option id. A map, not a linked graph:
    /// depth is capped so cycles cannot arise.
    #[serde(default)]
    pub follow_up_questions: HashMap<String, Vec<Question>>,
}

impl Question {
    /// Fallback yes/no options used when a payload omits or mangles its own.
    fn default_options() -> Vec<QuestionOption> {
        vec![
            QuestionOption {
                id: "yes".into(),
                label: "Yes".into(),
                description: None,
                default: true,
            },
            QuestionOption {
                id: "no".into(),
                label: "No".into(),
                description: None,
                default: false,
            },
        ]
    }

    /// Build a [`Question`] from an arbitrary tool-call payload.
    ///
    /// Partial failures never abort the session: unparseable payloads
    /// yield a minimal question with default options, and the caller emits
    /// a warning event. Returns `(question, salvaged)` where `salvaged`
    /// is true when the payload could not be decoded as-is.
    pub fn from_tool_input(input: &serde_json::Value) -> (Self, bool) {
        // Payloads arrive either as the question object itself or wrapped
        // under a "question"/"questions" key.
        let candidate = if let Some(q) = input.get("question") {
            q.clone()
        } else if let Some(serde_json::Value::Array(items)) = input.get("questions") {
            items.first().cloned().unwrap_or(serde_json::Value::Null)
        } else {
            input.clone()
        };

        match serde_json::from_value::<Question>(candidate) {
            Ok(mut q) => {
                let salvaged = q.normalize();
                (q, salvaged)
            }
            Err(_) => {
                // Salvage whatever text we can find.
                let text = input
                    .get("text")
                    .or_else(|| input.get("question"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("The agent needs your confirmation to continue.")
                    .to_string();
                let q = Question {
                    question_id: Uuid::new_v4().to_string(),
                    text,
                    question_type: QuestionType::MultipleChoice,
                    options: Self::default_options(),
                    multi_select: false,
                    min_selections: None,
                    max_selections: None,
                    required: true,
                    timeout_seconds: DEFAULT_QUESTION_TIMEOUT_SECS,
                    follow_up_questions: HashMap::new(),
                };
                (q, true)
            }
        }
    }

    /// Fill gaps a decoded payload may still have. Returns true if any
    /// field had to be repaired.
    fn normalize(&mut self) -> bool {
        let mut repaired = false;
        if self.question_id.is_empty() {
            self.question_id = Uuid::new_v4().to_string();
            repaired = true;
        }
        if self.text.trim().is_empty() {
            self.text = "The agent needs your confirmation to continue.".into();
            repaired = true;
        }
        if self.options.is_empty()
            && matches!(
                self.question_type,
                QuestionType::MultipleChoice | QuestionType::Checkbox
            )
        {
            self.options = Self::default_options();
            repaired = true;
        }
        if self.timeout_seconds == 0 {
            self.timeout_seconds = DEFAULT_QUESTION_TIMEOUT_SECS;
            repaired = true;
        }
        for option in &mut self.options {
            if option.label.chars().count() > MAX_OPTION_LABEL_LENGTH {
                option.label = option.label.chars().take(MAX_OPTION_LABEL_LENGTH).collect();
                repaired = true;
            }
        }
        repaired
    }

    /// Reject follow-up trees deeper than [`MAX_FOLLOW_UP_DEPTH`].
    pub fn validate_depth(&self) -> Result<()> {
        fn depth(q: &Question) -> usize {
            1 + q
                .follow_up_questions
                .values()
                .flatten()
                .map(depth)
                .max()
                .unwrap_or(0)
        }
        let d = depth(self);
        if d > MAX_FOLLOW_UP_DEPTH {
            return Err(Error::Validation(format!(
                "follow-up questions nest {d} levels deep (max {MAX_FOLLOW_UP_DEPTH})"
            )));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Answer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// User-supplied answer value. The wire shape depends on the question type:
/// a choice id, a list of ids, free text, or a boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Text(String),
    Many(Vec<String>),
    Null,
}

impl AnswerValue {
    /// Render the value for the tool-result payload sent back to the agent.
    pub fn to_display(&self) -> String {
        match self {
            AnswerValue::Bool(b) => b.to_string(),
            AnswerValue::Text(s) => s.clone(),
            AnswerValue::Many(items) => items.join(", "),
            AnswerValue::Null => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub answer: AnswerValue,
    #[serde(default)]
    pub follow_up_answers: Option<HashMap<String, AnswerValue>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sanitation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Strip markup-significant characters and cap the length of free-text
/// answers before they are injected back into the agent stream.
///
/// Option ids are never passed through this function; only labels and
/// free-text answers are rewritten.
pub fn sanitize_answer_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '<' | '>' | '&' | '"' | '\''))
        .take(MAX_ANSWER_LENGTH)
        .collect()
}

/// Sanitize an answer's free-text content in place, leaving choice ids and
/// booleans untouched.
pub fn sanitize_answer(answer: &mut Answer) {
    if let AnswerValue::Text(s) = &mut answer.answer {
        *s = sanitize_answer_text(s);
    }
    if let Some(follow_ups) = &mut answer.follow_up_answers {
        for value in follow_ups.values_mut() {
            if let AnswerValue::Text(s) = value {
                *s = sanitize_answer_text(s);
            }
        }
    }
}
