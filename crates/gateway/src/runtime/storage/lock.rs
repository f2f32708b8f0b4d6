//! Sentinel-file locking for the on-disk collections.
//!
//! Each collection file has a companion `<target>.lock`, acquired by
//! exclusive create. The sentinel approach is portable and sufficient for
//! the single-machine ownership model; the PID lock on the data directory
//! keeps whole foreign processes out, this keeps concurrent mutations of
//! one file serialized.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use ar_domain::{Error, Result};

pub struct FileLock {
    lock_path: PathBuf,
    timeout: Duration,
    retry_interval: Duration,
}

/// Holding the guard holds the lock; dropping it deletes the sentinel.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.lock_path.display(),
                    error = %e,
                    "failed to release file lock"
                );
            }
        }
    }
}

impl FileLock {
    pub fn for_target(target: &Path, timeout: Duration, retry_interval: Duration) -> Self {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        Self {
            lock_path: target.with_file_name(name),
            timeout,
            retry_interval,
        }
    }

    /// Acquire the lock, retrying at a fixed interval up to the timeout.
    /// A sentinel older than the timeout is treated as leaked by a crashed
    /// process and broken.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => {
                    return Ok(LockGuard {
                        lock_path: self.lock_path.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.break_if_stale() {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::StorageBusy(format!(
                            "lock {} not acquired within {:?}",
                            self.lock_path.display(),
                            self.timeout
                        )));
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => {
                    return Err(Error::StorageIo(format!(
                        "creating lock {}: {e}",
                        self.lock_path.display()
                    )));
                }
            }
        }
    }

    /// Remove a sentinel whose mtime is older than the lock timeout.
    /// Returns true if a stale lock was removed.
    fn break_if_stale(&self) -> bool {
        let Ok(meta) = std::fs::metadata(&self.lock_path) else {
            // Already released by its holder.
            return true;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok());
        match age {
            Some(age) if age > self.timeout => {
                tracing::warn!(
                    path = %self.lock_path.display(),
                    age_secs = age.as_secs(),
                    "breaking stale file lock"
                );
                std::fs::remove_file(&self.lock_path).is_ok()
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_lock(dir: &Path) -> FileLock {
        FileLock::for_target(
            &dir.join("queue.json"),
            Duration::from_millis(300),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn acquire_creates_and_release_removes_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let lock = quick_lock(dir.path());

        let guard = lock.acquire().await.unwrap();
        assert!(lock.lock_path().exists());
        drop(guard);
        assert!(!lock.lock_path().exists());
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = quick_lock(dir.path());

        let guard = lock.acquire().await.unwrap();
        let err = lock.acquire().await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_BUSY");

        drop(guard);
        let _guard = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn stale_sentinel_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("queue.json");
        let lock = FileLock::for_target(
            &target,
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        // Simulate a crashed holder: sentinel exists and goes stale.
        std::fs::write(lock.lock_path(), b"").unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let _guard = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn lock_path_is_sibling_with_suffix() {
        let lock = FileLock::for_target(
            Path::new("/data/queue.json"),
            Duration::from_secs(5),
            Duration::from_millis(100),
        );
        assert_eq!(lock.lock_path(), Path::new("/data/queue.json.lock"));
    }
}
