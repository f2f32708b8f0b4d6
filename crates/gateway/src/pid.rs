//! Single-owner guarantee for the data directory, backed by an `fs2`
//! exclusive lock on a PID file. A second AgentRunner pointed at the same
//! directory fails fast instead of corrupting the collections.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

pub struct PidLock {
    file: std::fs::File,
    path: PathBuf,
}

impl PidLock {
    /// Acquire the data-directory owner lock, writing our PID into it.
    pub fn acquire(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("agentrunner.pid");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "another AgentRunner instance already owns {} (pid file {})",
                data_dir.display(),
                path.display()
            )
        })?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), "data directory lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PidLock::acquire(dir.path()).unwrap();
        assert!(PidLock::acquire(dir.path()).is_err());
        drop(lock);
        let _relock = PidLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn pid_file_contains_our_pid() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = PidLock::acquire(dir.path()).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("agentrunner.pid")).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
