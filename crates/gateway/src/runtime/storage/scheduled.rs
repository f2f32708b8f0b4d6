//! The cron definition set, upserted by id.

use std::path::Path;

use ar_domain::config::StorageConfig;
use ar_domain::task::ScheduledTask;
use ar_domain::Result;
use uuid::Uuid;

use super::file::JsonFile;

pub struct ScheduledStore {
    file: JsonFile,
}

impl ScheduledStore {
    pub fn new(dir: &Path, config: &StorageConfig) -> Result<Self> {
        let file = JsonFile::new(dir, "scheduled.json", config);
        file.ensure_exists()?;
        Ok(Self { file })
    }

    /// Upsert by id: `save; save` leaves one record.
    pub async fn save(&self, task: ScheduledTask) -> Result<()> {
        self.file
            .mutate(|tasks: &mut Vec<ScheduledTask>| {
                match tasks.iter_mut().find(|t| t.id == task.id) {
                    Some(slot) => *slot = task,
                    None => tasks.push(task),
                }
            })
            .await
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        self.file
            .mutate(|tasks: &mut Vec<ScheduledTask>| {
                let before = tasks.len();
                tasks.retain(|t| t.id != id);
                tasks.len() < before
            })
            .await
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduledTask> {
        self.get_all().into_iter().find(|t| t.id == id)
    }

    pub fn get_all(&self) -> Vec<ScheduledTask> {
        self.file.read()
    }

    pub fn get_enabled(&self) -> Vec<ScheduledTask> {
        self.get_all().into_iter().filter(|t| t.enabled).collect()
    }

    pub fn count(&self) -> usize {
        self.get_all().len()
    }

    pub fn enabled_count(&self) -> usize {
        self.get_enabled().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, ScheduledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduledStore::new(dir.path(), &StorageConfig::default()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn save_twice_upserts() {
        let (_dir, store) = store().await;
        let mut task = ScheduledTask::new("nightly", "report", "0 3 * * *");
        store.save(task.clone()).await.unwrap();

        task.run_count = 5;
        store.save(task.clone()).await.unwrap();

        assert_eq!(store.count(), 1);
        assert_eq!(store.get(task.id).unwrap().run_count, 5);
    }

    #[tokio::test]
    async fn enabled_filter() {
        let (_dir, store) = store().await;
        let enabled = ScheduledTask::new("on", "p", "@daily");
        let mut disabled = ScheduledTask::new("off", "p", "@daily");
        disabled.enabled = false;

        store.save(enabled.clone()).await.unwrap();
        store.save(disabled).await.unwrap();

        assert_eq!(store.count(), 2);
        assert_eq!(store.enabled_count(), 1);
        assert_eq!(store.get_enabled()[0].id, enabled.id);
    }

    #[tokio::test]
    async fn remove_by_id() {
        let (_dir, store) = store().await;
        let task = ScheduledTask::new("x", "p", "@hourly");
        store.save(task.clone()).await.unwrap();

        assert!(store.remove(task.id).await.unwrap());
        assert!(!store.remove(task.id).await.unwrap());
        assert_eq!(store.count(), 0);
    }
}
