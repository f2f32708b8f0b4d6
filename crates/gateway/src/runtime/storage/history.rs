//! Bounded newest-first history of completed and failed tasks.

use std::path::Path;

use ar_domain::config::StorageConfig;
use ar_domain::task::{PaginatedResponse, Task};
use ar_domain::Result;
use uuid::Uuid;

use super::file::JsonFile;

pub struct HistoryStore {
    completed: JsonFile,
    failed: JsonFile,
    max_history: usize,
}

impl HistoryStore {
    pub fn new(dir: &Path, config: &StorageConfig) -> Result<Self> {
        let completed = JsonFile::new(dir, "completed.json", config);
        let failed = JsonFile::new(dir, "failed.json", config);
        completed.ensure_exists()?;
        failed.ensure_exists()?;
        Ok(Self {
            completed,
            failed,
            max_history: config.max_history,
        })
    }

    pub async fn add_completed(&self, task: Task) -> Result<()> {
        Self::prepend(&self.completed, task, self.max_history).await
    }

    pub async fn add_failed(&self, task: Task) -> Result<()> {
        Self::prepend(&self.failed, task, self.max_history).await
    }

    /// Insert at the head and truncate the tail to the bound.
    async fn prepend(file: &JsonFile, task: Task, bound: usize) -> Result<()> {
        file.mutate(|tasks: &mut Vec<Task>| {
            tasks.insert(0, task);
            tasks.truncate(bound);
        })
        .await
    }

    pub fn get_completed(&self, page: usize, limit: usize) -> PaginatedResponse<Task> {
        PaginatedResponse::paginate(self.completed.read(), page, limit)
    }

    pub fn get_failed(&self, page: usize, limit: usize) -> PaginatedResponse<Task> {
        PaginatedResponse::paginate(self.failed.read(), page, limit)
    }

    /// Look up a task in either history.
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.completed
            .read::<Task>()
            .into_iter()
            .chain(self.failed.read::<Task>())
            .find(|t| t.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read::<Task>().len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.read::<Task>().len()
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let in_completed = self
            .completed
            .mutate(|tasks: &mut Vec<Task>| {
                let before = tasks.len();
                tasks.retain(|t| t.id != id);
                tasks.len() < before
            })
            .await?;
        if in_completed {
            return Ok(true);
        }
        self.failed
            .mutate(|tasks: &mut Vec<Task>| {
                let before = tasks.len();
                tasks.retain(|t| t.id != id);
                tasks.len() < before
            })
            .await
    }
}
