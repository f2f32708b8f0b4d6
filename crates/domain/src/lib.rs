//! Shared domain types for AgentRunner: configuration, errors, task models,
//! interactive question/answer types, and the agent event alphabet.

pub mod config;
pub mod error;
pub mod question;
pub mod stream;
pub mod task;
pub mod tool;

pub use error::{Error, Result};
