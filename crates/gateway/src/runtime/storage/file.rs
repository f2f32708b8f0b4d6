//! One JSON collection file: tolerant reads, atomic locked writes.
//!
//! On-disk shape is `{"tasks": [...]}`. Readers never take the lock; they
//! tolerate a concurrent rename because reads open the file in one shot.
//! Corrupt or partial files read as empty rather than failing the caller.

use std::io::Write;
use std::path::{Path, PathBuf};

use ar_domain::config::StorageConfig;
use ar_domain::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::lock::FileLock;

pub(crate) struct JsonFile {
    path: PathBuf,
    lock: FileLock,
}

impl JsonFile {
    pub fn new(dir: &Path, name: &str, config: &StorageConfig) -> Self {
        let path = dir.join(name);
        let lock = FileLock::for_target(&path, config.lock_timeout(), config.lock_retry_interval());
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed row. Missing file, corrupt JSON, or rows that
    /// no longer decode are all tolerated; bad rows are skipped one by one.
    pub fn read<T: DeserializeOwned>(&self) -> Vec<T> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "collection read failed");
                }
                return Vec::new();
            }
        };
        if raw.trim().is_empty() {
            return Vec::new();
        }
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "corrupt collection file, treating as empty"
                );
                return Vec::new();
            }
        };
        let rows = value
            .get("tasks")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<T>(row) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "skipping undecodable row"
                    );
                }
            }
        }
        items
    }

    /// Read-modify-write under the file lock. The mutation closure returns
    /// whatever the caller wants back out.
    pub async fn mutate<T, R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R>
    where
        T: DeserializeOwned + Serialize,
    {
        let _guard = self.lock.acquire().await?;
        let mut items: Vec<T> = self.read();
        let out = f(&mut items);
        self.write_atomic(&items)?;
        Ok(out)
    }

    /// Serialize → temp file in the same directory → fsync → atomic rename.
    fn write_atomic<T: Serialize>(&self, items: &[T]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::StorageIo(format!("{} has no parent", self.path.display())))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::StorageIo(format!("creating {}: {e}", parent.display())))?;

        let body = serde_json::json!({ "tasks": items });
        let serialized = serde_json::to_vec_pretty(&body)
            .map_err(|e| Error::StorageIo(format!("serializing {}: {e}", self.path.display())))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| Error::StorageIo(format!("temp file in {}: {e}", parent.display())))?;
        // Temp file cleanup on failure is automatic (NamedTempFile deletes
        // itself unless persisted).
        temp.write_all(&serialized)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| Error::StorageIo(format!("writing {}: {e}", self.path.display())))?;
        temp.persist(&self.path)
            .map_err(|e| Error::StorageIo(format!("renaming over {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Create the file as an empty collection if it does not exist yet.
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.path.exists() {
            self.write_atomic::<serde_json::Value>(&[])?;
        }
        Ok(())
    }
}
