//! FIFO queue of pending tasks.

use std::path::Path;

use ar_domain::config::StorageConfig;
use ar_domain::task::Task;
use ar_domain::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::file::JsonFile;

pub struct QueueStore {
    file: JsonFile,
}

impl QueueStore {
    pub fn new(dir: &Path, config: &StorageConfig) -> Result<Self> {
        let file = JsonFile::new(dir, "queue.json", config);
        file.ensure_exists()?;
        Ok(Self { file })
    }

    /// Append to the tail.
    pub async fn add(&self, task: Task) -> Result<()> {
        self.file.mutate(|tasks: &mut Vec<Task>| tasks.push(task)).await
    }

    /// Insert at the head, ahead of everything queued.
    pub async fn push_front(&self, task: Task) -> Result<()> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| tasks.insert(0, task))
            .await
    }

    /// Pop the head unconditionally.
    pub async fn pop(&self) -> Result<Option<Task>> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| {
                if tasks.is_empty() {
                    None
                } else {
                    Some(tasks.remove(0))
                }
            })
            .await
    }

    /// Pop the first task eligible to run at `now`, skipping entries whose
    /// retry hold (`earliest_run_at`) has not elapsed yet.
    pub async fn pop_due(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| {
                let idx = tasks
                    .iter()
                    .position(|t| t.earliest_run_at.map_or(true, |at| at <= now))?;
                Some(tasks.remove(idx))
            })
            .await
    }

    /// Move a queued task to the head. Clears any retry hold so the next
    /// tick dispatches it. Returns false if the id is not queued.
    pub async fn move_to_front(&self, id: Uuid) -> Result<bool> {
        self.file
            .mutate(|tasks: &mut Vec<Task>| {
                let idx = match tasks.iter().position(|t| t.id == id) {
                    Some(idx) => idx,
                    None => return false,
                };
                let mut task = tasks.remove(idx);
                task.earliest_run_at = None;
                tasks.insert(0, task);
                true
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, QueueStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path(), &StorageConfig::default()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn fifo_order() {
        let (_dir, store) = store().await;
        let a = Task::new("a");
        let b = Task::new("b");
        store.add(a.clone()).await.unwrap();
        store.add(b.clone()).await.unwrap();

        assert_eq!(store.count(), 2);
        assert_eq!(store.pop().await.unwrap().unwrap().id, a.id);
        assert_eq!(store.pop().await.unwrap().unwrap().id, b.id);
        assert!(store.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_due_honours_retry_hold() {
        let (_dir, store) = store().await;
        let now = Utc::now();

        let mut held = Task::new("held");
        held.earliest_run_at = Some(now + chrono::Duration::seconds(60));
        let ready = Task::new("ready");

        store.add(held.clone()).await.unwrap();
        store.add(ready.clone()).await.unwrap();

        // The held head is skipped; the eligible later entry pops.
        let popped = store.pop_due(now).await.unwrap().unwrap();
        assert_eq!(popped.id, ready.id);

        // Nothing else is eligible yet.
        assert!(store.pop_due(now).await.unwrap().is_none());
        assert_eq!(store.count(), 1);

        // Once the hold elapses, the held task pops.
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(store.pop_due(later).await.unwrap().unwrap().id, held.id);
    }

    #[tokio::test]
    async fn move_to_front_reorders_and_clears_hold() {
        let (_dir, store) = store().await;
        let a = Task::new("a");
        let mut b = Task::new("b");
        b.earliest_run_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.add(a.clone()).await.unwrap();
        store.add(b.clone()).await.unwrap();

        assert!(store.move_to_front(b.id).await.unwrap());
        let all = store.get_all();
        assert_eq!(all[0].id, b.id);
        assert!(all[0].earliest_run_at.is_none());

        assert!(!store.move_to_front(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let (_dir, store) = store().await;
        let a = Task::new("a");
        store.add(a.clone()).await.unwrap();
        store.add(Task::new("b")).await.unwrap();

        assert!(store.remove(a.id).await.unwrap());
        assert!(!store.remove(a.id).await.unwrap());
        assert_eq!(store.count(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn get_by_id() {
        let (_dir, store) = store().await;
        let a = Task::new("a");
        store.add(a.clone()).await.unwrap();
        assert_eq!(store.get(a.id).unwrap().prompt, "a");
        assert!(store.get(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = Task::new("persisted");
        {
            let store = QueueStore::new(dir.path(), &StorageConfig::default()).unwrap();
            store.add(a.clone()).await.unwrap();
        }
        let store = QueueStore::new(dir.path(), &StorageConfig::default()).unwrap();
        assert_eq!(store.get(a.id).unwrap().prompt, "persisted");
    }
}
