use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where tasks are allowed to run. Unless `allow_any` is set, every task
/// workspace must resolve to a path under `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_root")]
    pub root: PathBuf,
    /// Disable the sandbox entirely (test environments).
    #[serde(default)]
    pub allow_any: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: d_root(),
            allow_any: false,
        }
    }
}

impl WorkspaceConfig {
    /// Resolve and validate a task workspace path.
    ///
    /// Blank or `"."` means the workspace root itself. Relative paths are
    /// resolved against the root. The resolved absolute path must stay
    /// inside the root unless the sandbox is disabled.
    pub fn resolve(&self, workspace: &str) -> Result<PathBuf> {
        let trimmed = workspace.trim();
        let root = normalize(&self.root);

        let candidate = if trimmed.is_empty() || trimmed == "." {
            root.clone()
        } else {
            let p = Path::new(trimmed);
            if p.is_absolute() {
                normalize(p)
            } else {
                normalize(&root.join(p))
            }
        };

        if self.allow_any || candidate.starts_with(&root) {
            Ok(candidate)
        } else {
            Err(Error::Validation(format!(
                "workspace {} is outside the allowed root {}",
                candidate.display(),
                root.display()
            )))
        }
    }
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem, so validation cannot be bypassed with
/// `allowed/../..` tricks on paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn d_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
