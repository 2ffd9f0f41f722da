//! Worker process management.

mod control;
mod controller;
mod health;
mod scan;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

pub use control::{force_kill, is_process_alive, terminate_with_grace};
pub use controller::{ProcessStatus, WorkerController};
pub use health::HttpProbe;
pub use scan::{find_orphans, matches_worker_signature};

/// Timeout for graceful shutdown of the tracked worker before force killing.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for graceful shutdown of an orphaned worker before force killing.
const ORPHAN_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness poll interval while waiting for a signalled process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How the worker is invoked: `interpreter script args...` in `cwd`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerCommand {
    pub interpreter: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Port the worker listens on. Part of the orphan signature.
    pub port: u16,
}

impl WorkerCommand {
    /// Script file name used to recognise the worker in a process table.
    pub fn script_name(&self) -> String {
        self.script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.script.display().to_string())
    }
}

/// The single live worker process owned by the controller.
#[derive(Debug)]
pub struct WorkerHandle {
    pub pid: u32,
    pub started_at: DateTime<Local>,
    pub(crate) child: tokio::process::Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "code")]
pub enum ExitState {
    Running,
    /// Exit code, `None` when terminated by a signal.
    Exited(Option<i32>),
    NotTracked,
}
