//! Ephemeral per-attempt workspaces.
//!
//! A [`Workspace`] is a private directory that doubles as `$HOME` for every
//! command run during one promotion attempt, so git configuration, SSH keys
//! and stored credentials never leak between attempts. The directory is
//! removed when the workspace is dropped unless it was marked to be kept.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const WORKSPACE_PREFIX: &str = "promote-";

/// Allocates workspaces.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    base: Option<PathBuf>,
    keep: bool,
}

impl WorkspaceManager {
    /// Allocate under the system temporary directory and delete on release.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate under a specific directory instead of the system temp dir.
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Keep workspaces on disk after release (for debugging).
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Create a fresh, empty, uniquely named workspace.
    pub fn acquire(&self) -> Result<Workspace> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix(WORKSPACE_PREFIX);
            b
        };

        let dir = match &self.base {
            Some(base) => {
                fs::create_dir_all(base).map_err(|source| Error::Workspace {
                    path: base.clone(),
                    source,
                })?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(|source| Error::Workspace {
            path: self.base.clone().unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let root = dir.path().to_path_buf();
        log::debug!("created workspace {}", root.display());

        Ok(Workspace {
            dir: Some(dir),
            root,
            keep: self.keep,
        })
    }
}

/// An exclusively owned directory scoped to one promotion attempt.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Workspace root; used as `$HOME` for every command.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the repository is cloned.
    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// `~/.ssh` inside the workspace.
    pub fn ssh_dir(&self) -> PathBuf {
        self.root.join(".ssh")
    }

    /// File backing the git `store` credential helper.
    pub fn credentials_file(&self) -> PathBuf {
        self.root.join(".git-credentials")
    }

    /// Environment overrides applied to every command run in this workspace.
    pub fn env(&self) -> Vec<(&'static str, OsString)> {
        vec![
            ("HOME", self.root.clone().into_os_string()),
            ("XDG_CONFIG_HOME", self.root.join(".config").into_os_string()),
            ("GIT_TERMINAL_PROMPT", OsString::from("0")),
        ]
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let path = dir.keep();
            log::info!("kept workspace {}", path.display());
            return;
        }
        if let Err(e) = dir.close() {
            log::warn!("failed to remove workspace {}: {}", self.root.display(), e);
        } else {
            log::debug!("removed workspace {}", self.root.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_empty_directory() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new().with_base(base.path()).acquire().unwrap();

        assert!(ws.root().is_dir());
        assert!(ws.root().starts_with(base.path()));
        assert_eq!(fs::read_dir(ws.root()).unwrap().count(), 0);
        assert_eq!(ws.repo_dir(), ws.root().join("repo"));
    }

    #[test]
    fn test_concurrent_workspaces_do_not_share_paths() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new().with_base(base.path());
        let a = manager.acquire().unwrap();
        let b = manager.acquire().unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_drop_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new().with_base(base.path()).acquire().unwrap();
        let root = ws.root().to_path_buf();
        fs::write(root.join("file"), "x").unwrap();

        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn test_keep_retains_directory() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new()
            .with_base(base.path())
            .keep(true)
            .acquire()
            .unwrap();
        let root = ws.root().to_path_buf();

        drop(ws);
        assert!(root.is_dir());
    }

    #[test]
    fn test_acquire_creates_missing_base() {
        let base = tempfile::tempdir().unwrap();
        let nested = base.path().join("a").join("b");
        let ws = WorkspaceManager::new().with_base(&nested).acquire().unwrap();
        assert!(ws.root().starts_with(&nested));
    }

    #[cfg(unix)]
    #[test]
    fn test_acquire_fails_with_workspace_error() {
        use crate::error::ErrorCategory;

        let base = tempfile::tempdir().unwrap();
        let blocker = base.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();

        let err = WorkspaceManager::new()
            .with_base(&blocker)
            .acquire()
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Workspace);
    }

    #[test]
    fn test_env_points_home_at_root() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new().with_base(base.path()).acquire().unwrap();
        let env = ws.env();
        let home = env.iter().find(|(k, _)| *k == "HOME").unwrap();
        assert_eq!(Path::new(&home.1), ws.root());
        assert!(env.iter().any(|(k, v)| *k == "GIT_TERMINAL_PROMPT" && v == "0"));
    }
}
