//! Tasks currently executing. Expected cardinality is the executor count,
//! so linear scans are fine.

use std::path::Path;

use ar_domain::config::StorageConfig;
use ar_domain::task::Task;
use ar_domain::Result;
use uuid::Uuid;

use super::file::JsonFile;

pub struct RunningStore {
    file: JsonFile,
}

impl RunningStore {
    pub fn new(dir: &Path, config: &StorageConfig) -> Result<Self> {
        let file = JsonFile::new(dir, "running.json", config);
        file.ensure_exists()?;
        Ok(Self { file })
    }

    pub async fn add(&self, task: Task) -> Result<()> {
        self.file.mutate(|tasks: &mut Vec<Task>| tasks.push(task)).await
    }

    pub async fn update(&self, task: Task) -> Result<bool> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| {
                match tasks.iter_mut().find(|t| t.id == task.id) {
                    Some(slot) => {
                        *slot = task;
                        true
                    }
                    None => false,
                }
            })
            .await
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| {
                let before = tasks.len();
                tasks.retain(|t| t.id != id);
                tasks.len() < before
            })
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.file.mutate(|tasks: &mut Vec<Task>| tasks.clear()).await
    }

    /// Remove and return everything, in one locked sweep. Used by the
    /// boot-time stale-RUNNING recovery.
    pub async fn drain(&self) -> Result<Vec<Task>> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| std::mem::take(tasks))
            .await
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.get_all().into_iter().find(|t| t.id == id)
    }

    pub fn get_all(&self) -> Vec<Task> {
        self.file.read()
    }

    pub fn count(&self) -> usize {
        self.get_all().len()
    }
}
