//! Streaming session manager: runs one agent invocation per client stream,
//! suspends it when the agent asks the user a question, and resumes it when
//! the answer arrives out-of-band.

mod manager;
mod payload;

pub use manager::{SessionManager, SessionStatus, StreamRequest};
pub use payload::{build_tool_result_payload, NO_ANSWER_MESSAGE};
