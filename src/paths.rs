//! Centralized path utilities for the launcher installation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

pub const VERSION_FILE: &str = "version.json";
pub const STAGING_DIR: &str = ".update_staging";
pub const STAGED_ARCHIVE: &str = "update.zip";

/// On-disk layout rooted at the launcher's installation directory.
#[derive(Debug, Clone)]
pub struct LauncherPaths {
    root: PathBuf,
}

impl LauncherPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the installation root: an explicit override, or the directory
    /// containing the running executable.
    pub fn discover(override_root: Option<&Path>) -> Result<Self> {
        if let Some(root) = override_root {
            return Ok(Self::new(root));
        }
        let exe = std::env::current_exe()
            .map_err(|e| AppError::config(format!("Failed to get current exe path: {e}")))?;
        let dir = exe
            .parent()
            .ok_or_else(|| AppError::config("Failed to get exe directory"))?;
        Ok(Self::new(dir))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path to the launcher config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("launcher.toml")
    }

    /// Installed version marker (`{"version": "x.y.z"}`).
    pub fn version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Archive downloaded into the staging area before extraction.
    pub fn staged_archive(&self) -> PathBuf {
        self.staging_dir().join(STAGED_ARCHIVE)
    }

    /// Launch arguments recorded for the worker.
    pub fn launch_snapshot(&self) -> PathBuf {
        self.root.join("worker_launch_args.json")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("worker.pid")
    }

    /// Combined stdout/stderr of the worker process.
    pub fn worker_output_log(&self) -> PathBuf {
        self.root.join("worker_output.log")
    }

    pub fn launcher_log(&self) -> PathBuf {
        self.root.join("launcher.log")
    }

    pub fn web_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Ensure the installation root exists.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| AppError::io(e.to_string()))
    }
}

/// Check if a directory exists and has at least one entry.
pub fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
