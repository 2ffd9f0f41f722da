//! Process-table scan for worker instances the launcher lost track of.

use std::ffi::OsString;

use sysinfo::{ProcessesToUpdate, System};

use super::WorkerCommand;

/// A worker signature matches when the command line mentions both the
/// script name and the port.
pub fn matches_worker_signature(cmdline: &[OsString], command: &WorkerCommand) -> bool {
    if cmdline.is_empty() {
        return false;
    }
    let joined = cmdline
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    joined.contains(&command.script_name()) && joined.contains(&command.port.to_string())
}

/// Command line of a live process, if it can be read.
pub(super) fn process_cmdline(pid: u32) -> Option<Vec<OsString>> {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.cmd().to_vec())
}

/// PIDs of processes matching the worker signature, excluding `exclude`
/// and the launcher itself.
pub fn find_orphans(command: &WorkerCommand, exclude: &[u32]) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .map(|(pid, process)| (pid.as_u32(), process))
        .filter(|(pid, _)| *pid != own_pid && !exclude.contains(pid))
        .filter(|(_, process)| matches_worker_signature(process.cmd(), command))
        .map(|(pid, _)| pid)
        .collect();
    pids.sort_unstable();
    pids
}
