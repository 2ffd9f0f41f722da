//! Platform-agnostic process control functions.

use std::time::Duration;

use tokio::time::Instant;

use super::EXIT_POLL_INTERVAL;
use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    kill(Pid::from_raw(raw), None).is_ok()
}

/// Ask the process tree to exit via `taskkill` without `/F`.
#[cfg(target_os = "windows")]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use std::os::windows::process::CommandExt as _;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .creation_flags(CREATE_NO_WINDOW.0)
        .status()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(AppError::process(format!(
            "taskkill refused graceful stop of PID {pid}"
        )))
    }
}

/// Send a graceful shutdown signal to a process.
#[cfg(not(target_os = "windows"))]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(raw_pid(pid)?), Signal::SIGTERM)
        .map_err(|e| AppError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        Err(AppError::process(format!(
            "taskkill failed for pid {}: {}",
            pid,
            if detail.is_empty() {
                "(no output)"
            } else {
                detail
            }
        )))
    }
}

/// Kill the process group led by `pid`, or the process alone if it has none.
#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(raw_pid(pid)?);
    match getpgid(Some(target)) {
        // Never signal our own group: an orphan may have inherited it.
        Ok(pgid) if pgid != nix::unistd::getpgrp() => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Ok(_) => kill(target, Signal::SIGKILL)
            .map_err(|e| AppError::process(format!("Failed to kill process {pid}: {e}"))),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::process(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

#[cfg(not(target_os = "windows"))]
fn raw_pid(pid: u32) -> Result<i32> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| AppError::process(format!("Invalid PID {pid}")))
}

/// Poll until `pid` is gone or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Send the graceful signal, wait up to `timeout`, then force kill.
///
/// Used for processes the launcher did not spawn itself, which it cannot
/// reap. Returns `true` once the process is gone.
pub async fn terminate_with_grace(pid: u32, timeout: Duration) -> bool {
    if !is_process_alive(pid) {
        return true;
    }
    match graceful_signal(pid) {
        Ok(()) => {
            if wait_for_exit(pid, timeout).await {
                return true;
            }
            log::warn!(
                "PID {pid} did not exit within {}s, force killing",
                timeout.as_secs()
            );
        }
        Err(e) => {
            log::warn!("Graceful signal failed for PID {pid}: {e}, will force kill immediately");
        }
    }

    if let Err(e) = force_kill(pid) {
        log::error!("Failed to force kill PID {pid}: {e}");
        return false;
    }
    wait_for_exit(pid, Duration::from_secs(1)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn zero_pid_is_never_alive() {
        assert!(!is_process_alive(0));
        assert!(force_kill(0).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_with_grace_stops_a_sleeping_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let reaper = std::thread::spawn(move || child.wait());

        assert!(terminate_with_grace(pid, Duration::from_secs(5)).await);
        assert!(reaper.join().unwrap().is_ok());
    }
}
