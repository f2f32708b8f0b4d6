//! Persistent, lock-guarded, atomic JSON storage for the five task
//! collections.
//!
//! A task lives in exactly one collection at a time: `queue.json` (pending,
//! FIFO), `running.json`, `completed.json` or `failed.json` (bounded
//! newest-first histories). `scheduled.json` holds the cron definitions
//! that emit tasks. Every mutation is a read-modify-write under a sentinel
//! file lock followed by an atomic temp-file rename; readers go lock-free
//! and tolerate concurrent renames and corrupt files.

mod file;
mod history;
mod lock;
mod queue;
mod running;
mod scheduled;

pub use history::HistoryStore;
pub use queue::QueueStore;
pub use running::RunningStore;
pub use scheduled::ScheduledStore;

use std::path::Path;

use ar_domain::config::StorageConfig;
use ar_domain::task::Task;
use ar_domain::Result;
use uuid::Uuid;

/// The unified storage handle threaded through the runtime.
pub struct TaskStorage {
    pub queue: QueueStore,
    pub scheduled: ScheduledStore,
    pub running: RunningStore,
    pub history: HistoryStore,
}

impl TaskStorage {
    /// Open (creating if necessary) all five collections under `data_dir`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let dir: &Path = &config.data_dir;
        Ok(Self {
            queue: QueueStore::new(dir, config)?,
            scheduled: ScheduledStore::new(dir, config)?,
            running: RunningStore::new(dir, config)?,
            history: HistoryStore::new(dir, config)?,
        })
    }

    /// Find a task wherever it currently lives: queue, running, then the
    /// histories.
    pub fn find_task(&self, id: Uuid) -> Option<Task> {
        self.queue
            .get(id)
            .or_else(|| self.running.get(id))
            .or_else(|| self.history.get(id))
    }
}
