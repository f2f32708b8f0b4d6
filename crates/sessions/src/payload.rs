//! Tool-result payload construction for answered (and unanswered)
//! questions.

use ar_domain::question::{Answer, AnswerValue, Question};

/// Injected verbatim when a question times out or the session is cancelled
/// before the user responds.
pub const NO_ANSWER_MESSAGE: &str = "User did not answer the question.";

fn answer_value_json(value: &AnswerValue) -> serde_json::Value {
    match value {
        AnswerValue::Bool(b) => serde_json::Value::Bool(*b),
        AnswerValue::Text(s) => serde_json::Value::String(s.clone()),
        AnswerValue::Many(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|s| serde_json::Value::String(s.clone()))
                .collect(),
        ),
        AnswerValue::Null => serde_json::Value::Null,
    }
}

/// Build the content injected back into the agent stream after an answer:
/// a JSONL-shaped `{questions, answers}` object followed by a
/// human-readable description line.
pub fn build_tool_result_payload(question: &Question, answer: &Answer) -> String {
    let mut questions = vec![serde_json::Value::String(question.text.clone())];
    let mut answers = serde_json::Map::new();
    answers.insert(question.text.clone(), answer_value_json(&answer.answer));

    if let Some(follow_ups) = &answer.follow_up_answers {
        for (key, value) in follow_ups {
            // Prefer the follow-up question's own text as the answer key;
            // fall back to the raw key when it is not in the tree.
            let children = question.follow_up_questions.get(key);
            match children.and_then(|c| c.first()) {
                Some(child) => {
                    questions.push(serde_json::Value::String(child.text.clone()));
                    answers.insert(child.text.clone(), answer_value_json(value));
                }
                None => {
                    answers.insert(key.clone(), answer_value_json(value));
                }
            }
        }
    }

    let record = serde_json::json!({
        "questions": questions,
        "answers": answers,
    });

    let description = format!(
        "User answered \"{}\" with: {}",
        question.text,
        answer.answer.to_display()
    );

    format!("{record}\n{description}")
}
