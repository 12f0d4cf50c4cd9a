//! Per-run scratch directories.
//!
//! Every playbook run gets its own private data directory. By default it is a
//! fresh temporary directory named with a UTC timestamp so retained
//! workspaces sort by creation time. A fixed directory can be configured
//! instead, in which case it is used as-is and never deleted.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Name prefix for created workspaces.
pub const WORKSPACE_PREFIX: &str = "playspawn-";

/// Hands out and cleans up run workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    /// Parent directory for created workspaces (system temp dir if unset).
    root: Option<PathBuf>,
    /// Pre-existing directory used for every run instead of a fresh one.
    fixed: Option<PathBuf>,
    /// Keep created workspaces on release instead of deleting them.
    keep: bool,
}

impl Default for WorkspaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceManager {
    /// Create a manager that makes temporary workspaces in the system temp dir.
    pub fn new() -> Self {
        Self {
            root: None,
            fixed: None,
            keep: false,
        }
    }

    /// Create workspaces under this directory.
    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        self.root = root;
        self
    }

    /// Use a pre-existing directory for every run.
    pub fn with_fixed_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.fixed = dir;
        self
    }

    /// Retain workspaces after each run.
    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Obtain a workspace for one run.
    pub fn acquire(&self) -> io::Result<Workspace> {
        if let Some(dir) = &self.fixed {
            debug!(path = %dir.display(), "Using fixed workspace");
            return Ok(Workspace {
                path: dir.clone(),
                owned: None,
            });
        }

        let prefix = format!("{WORKSPACE_PREFIX}{}-", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "Created workspace");

        Ok(Workspace {
            path: dir.path().to_path_buf(),
            owned: Some(dir),
        })
    }

    /// Release a workspace according to this manager's retention setting.
    ///
    /// Returns the path when a created workspace was retained.
    pub fn release(&self, workspace: Workspace) -> Option<PathBuf> {
        workspace.release(self.keep)
    }
}

/// A workspace handed out for one run.
///
/// Dropping an unreleased handle deletes a created workspace, so a cancelled
/// run still cleans up after itself.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    owned: Option<TempDir>,
}

impl Workspace {
    /// Path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this workspace was created for the run (and may be deleted).
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    /// Release the workspace: keep it, or delete it if it was created for the run.
    ///
    /// A pre-existing directory is never touched. Deletion failures are
    /// logged, not returned.
    pub fn release(self, keep: bool) -> Option<PathBuf> {
        let dir = self.owned?;
        if keep {
            let path = dir.keep();
            info!(path = %path.display(), "Not deleting workspace");
            return Some(path);
        }
        if let Err(e) = dir.close() {
            warn!(path = %self.path.display(), error = %e, "Failed to delete workspace");
        }
        None
    }
}
