use std::sync::Arc;

use ar_agent::AgentBackend;
use ar_domain::config::Config;
use ar_sessions::SessionManager;

use crate::runtime::cron::CronParser;
use crate::runtime::executor::TaskExecutor;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::storage::TaskStorage;

/// Shared application state passed to all API handlers.
///
/// Every component is an explicit handle owned here and wired once at
/// startup; nothing lives in module-level globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Persistent task collections.
    pub storage: Arc<TaskStorage>,
    /// Single-flight task executor.
    pub executor: Arc<TaskExecutor>,
    /// Poll loop materialising crons and draining the queue.
    pub scheduler: Arc<Scheduler>,
    /// Streaming session manager (question/answer pauses).
    pub sessions: Arc<SessionManager>,
    /// The agent adapter used for streaming requests.
    pub backend: Arc<dyn AgentBackend>,
    /// Memoizing cron parser shared by scheduler and API validation.
    pub cron: Arc<CronParser>,
}
