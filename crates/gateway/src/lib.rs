//! AgentRunner gateway: persistent task storage, the cron engine, the
//! executor and scheduler loop, and the REST/SSE control plane.

pub mod api;
pub mod pid;
pub mod runtime;
pub mod state;
