/// Shared error type used across all AgentRunner crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("storage busy: {0}")]
    StorageBusy(String),

    #[error("storage IO: {0}")]
    StorageIo(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("agent: {0}")]
    Agent(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is not waiting for an answer: {0}")]
    SessionNotWaiting(String),

    #[error("question id mismatch: expected {expected}, got {got}")]
    QuestionIdMismatch { expected: String, got: String },

    #[error("answer timed out after {0}s")]
    AnswerTimeout(u64),

    #[error("too many pending questions")]
    ConcurrencyLimit,

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short machine-readable code, used by the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::InvalidCron(_) => "INVALID_CRON",
            Error::StorageBusy(_) => "STORAGE_BUSY",
            Error::StorageIo(_) | Error::Io(_) | Error::Json(_) => "STORAGE_IO",
            Error::TaskNotFound(_) => "TASK_NOT_FOUND",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::SessionNotWaiting(_) => "SESSION_NOT_WAITING",
            Error::QuestionIdMismatch { .. } => "QUESTION_ID_MISMATCH",
            Error::AnswerTimeout(_) => "ANSWER_TIMEOUT",
            Error::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            Error::Timeout(_) => "TIMEOUT",
            Error::Cancelled => "CANCELLED",
            Error::Agent(_) => "AGENT_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
