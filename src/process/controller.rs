//! Lifecycle of the single supervised worker process.

use std::fs;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::control::{force_kill, graceful_signal, is_process_alive, terminate_with_grace};
use super::scan::{find_orphans, matches_worker_signature, process_cmdline};
use super::{ExitState, WorkerCommand, WorkerHandle, GRACEFUL_STOP_TIMEOUT, ORPHAN_STOP_TIMEOUT};
use crate::error::{AppError, Result};
use crate::paths::LauncherPaths;
use crate::restart::WorkerControl;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
}

/// Owns the worker handle and the PID file.
pub struct WorkerController {
    command: WorkerCommand,
    paths: LauncherPaths,
    self_markers: Vec<String>,
    handle: Mutex<Option<WorkerHandle>>,
}

impl WorkerController {
    pub fn new(command: WorkerCommand, paths: LauncherPaths, extra_markers: &[String]) -> Self {
        let mut self_markers: Vec<String> = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .into_iter()
            .chain(extra_markers.iter().cloned())
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self_markers.dedup();

        Self {
            command,
            paths,
            self_markers,
            handle: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Script file name or first launch argument that names the launcher
    /// itself, if any.
    pub fn self_reference(&self) -> Option<String> {
        let script = self
            .command
            .script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        script
            .into_iter()
            .chain(self.command.args.iter().cloned())
            .find(|arg| {
                let arg = arg.to_lowercase();
                self.self_markers.iter().any(|m| arg.contains(m.as_str()))
            })
    }

    /// Spawn the worker. Failures are logged and reported as `false`.
    pub async fn start(&self) -> bool {
        match self.try_start().await {
            Ok(pid) => {
                log::info!(
                    "Worker started (pid: {}, port: {})",
                    pid,
                    self.command.port
                );
                true
            }
            Err(e) => {
                log::error!("Failed to start worker: {e}");
                false
            }
        }
    }

    async fn try_start(&self) -> Result<u32> {
        if let Some(arg) = self.self_reference() {
            return Err(AppError::process(format!(
                "Refusing to start worker: argument '{arg}' refers to the launcher itself"
            )));
        }

        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_mut() {
            if matches!(handle.child.try_wait(), Ok(None)) {
                return Err(AppError::process(format!(
                    "Worker already running (pid: {})",
                    handle.pid
                )));
            }
            *guard = None;
        }

        let output = fs::File::create(self.paths.worker_output_log())?;
        let output_err = output.try_clone()?;

        let mut cmd = Command::new(&self.command.interpreter);
        cmd.arg(&self.command.script)
            .args(&self.command.args)
            .current_dir(&self.command.cwd)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(output_err));

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP.0 | CREATE_NO_WINDOW.0);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| AppError::process(format!("Failed to spawn worker: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::process("Failed to get process ID"))?;

        *guard = Some(WorkerHandle {
            pid,
            started_at: Local::now(),
            child,
        });
        drop(guard);

        self.write_pid_file(pid);
        Ok(pid)
    }

    /// Stop the tracked worker and any orphaned instance. Never fails hard.
    pub async fn stop(&self) -> bool {
        let mut guard = self.handle.lock().await;
        let tracked = guard.take();
        drop(guard);

        let tracked_pid = tracked.as_ref().map(|h| h.pid);
        let mut ok = match tracked {
            Some(handle) => stop_tracked(handle).await,
            None => true,
        };

        if !self.reconcile_orphans(tracked_pid).await {
            ok = false;
        }

        self.clear_pid_file();
        ok
    }

    /// Terminate worker instances the launcher no longer owns. The PID file
    /// is consulted first; the process table is scanned only if it yields
    /// nothing.
    async fn reconcile_orphans(&self, tracked_pid: Option<u32>) -> bool {
        if let Some(pid) = self.read_pid_file() {
            if Some(pid) != tracked_pid
                && pid != std::process::id()
                && is_process_alive(pid)
                && process_cmdline(pid)
                    .is_some_and(|cmdline| matches_worker_signature(&cmdline, &self.command))
            {
                log::info!("Terminating orphaned worker from PID file (pid: {pid})");
                return terminate_with_grace(pid, ORPHAN_STOP_TIMEOUT).await;
            }
            log::debug!("PID file entry {pid} is stale");
        }

        let command = self.command.clone();
        let exclude: Vec<u32> = tracked_pid.into_iter().collect();
        let orphans = match tokio::task::spawn_blocking(move || find_orphans(&command, &exclude))
            .await
        {
            Ok(orphans) => orphans,
            Err(e) => {
                log::warn!("Process table scan failed: {e}");
                return false;
            }
        };

        let mut ok = true;
        for pid in orphans {
            log::info!("Terminating orphaned worker found by scan (pid: {pid})");
            if !terminate_with_grace(pid, ORPHAN_STOP_TIMEOUT).await {
                ok = false;
            }
        }
        ok
    }

    pub async fn poll_exit(&self) -> ExitState {
        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_mut() else {
            return ExitState::NotTracked;
        };
        match handle.child.try_wait() {
            Ok(None) => ExitState::Running,
            Ok(Some(status)) => ExitState::Exited(status.code()),
            Err(e) => {
                log::warn!("Failed to poll worker (pid: {}): {e}", handle.pid);
                ExitState::Exited(None)
            }
        }
    }

    /// PID of the tracked worker, running or not.
    pub async fn pid(&self) -> Option<u32> {
        self.handle.lock().await.as_ref().map(|h| h.pid)
    }

    /// Whether a worker is running: the tracked one, else the PID on file.
    pub async fn process_status(&self) -> ProcessStatus {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_mut() {
            let running = matches!(handle.child.try_wait(), Ok(None));
            return ProcessStatus {
                running,
                pid: Some(handle.pid),
            };
        }
        drop(guard);

        match self.read_pid_file() {
            Some(pid) if is_process_alive(pid) => ProcessStatus {
                running: true,
                pid: Some(pid),
            },
            _ => ProcessStatus {
                running: false,
                pid: None,
            },
        }
    }

    /// Last `max_chars` characters of the worker's combined output.
    pub fn output_tail(&self, max_chars: usize) -> String {
        let Ok(bytes) = fs::read(self.paths.worker_output_log()) else {
            return String::new();
        };
        let text = String::from_utf8_lossy(&bytes);
        let skip = text.chars().count().saturating_sub(max_chars);
        text.chars().skip(skip).collect()
    }

    /// Record an externally started worker so `stop` can find it.
    pub fn adopt_pid(&self, pid: u32) {
        if is_process_alive(pid) {
            self.write_pid_file(pid);
        }
    }

    pub fn read_pid_file(&self) -> Option<u32> {
        fs::read_to_string(self.paths.pid_file())
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn write_pid_file(&self, pid: u32) {
        if let Err(e) = fs::write(self.paths.pid_file(), pid.to_string()) {
            log::warn!("Failed to write PID file: {e}");
        }
    }

    fn clear_pid_file(&self) {
        let path = self.paths.pid_file();
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("Failed to remove PID file: {e}");
            }
        }
    }
}

/// SIGTERM, wait for exit, then kill the process group and reap.
async fn stop_tracked(mut handle: WorkerHandle) -> bool {
    let pid = handle.pid;
    if let Ok(Some(status)) = handle.child.try_wait() {
        log::info!("Worker (pid: {pid}) had already exited ({status})");
        return true;
    }

    match graceful_signal(pid) {
        Ok(()) => {
            match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, handle.child.wait()).await {
                Ok(Ok(status)) => {
                    log::info!("Worker (pid: {pid}) stopped ({status})");
                    return true;
                }
                Ok(Err(e)) => log::warn!("Failed to wait for worker (pid: {pid}): {e}"),
                Err(_) => log::warn!(
                    "Worker (pid: {pid}) did not exit within {}s, force killing",
                    GRACEFUL_STOP_TIMEOUT.as_secs()
                ),
            }
        }
        Err(e) => log::warn!("Graceful signal failed for worker (pid: {pid}): {e}"),
    }

    if let Err(e) = force_kill(pid) {
        log::error!("Failed to force kill worker (pid: {pid}): {e}");
    }
    match handle.child.wait().await {
        Ok(status) => {
            log::info!("Worker (pid: {pid}) killed ({status})");
            true
        }
        Err(e) => {
            log::error!("Failed to reap worker (pid: {pid}): {e}");
            false
        }
    }
}

#[async_trait]
impl WorkerControl for WorkerController {
    async fn start(&self) -> bool {
        Self::start(self).await
    }

    async fn stop(&self) -> bool {
        Self::stop(self).await
    }

    async fn poll_exit(&self) -> ExitState {
        Self::poll_exit(self).await
    }

    fn output_tail(&self, max_chars: usize) -> String {
        Self::output_tail(self, max_chars)
    }
}
