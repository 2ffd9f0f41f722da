//! Interactive console: `r` + Enter restarts the worker.

use std::io::IsTerminal as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio_util::sync::CancellationToken;

use crate::restart::RestartOrchestrator;

pub fn is_restart_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("r")
}

/// Read console commands until stdin closes or `running` is cancelled.
/// Does nothing when stdin is not a terminal.
pub async fn run_console(orchestrator: Arc<RestartOrchestrator>, running: CancellationToken) {
    if !std::io::stdin().is_terminal() {
        log::debug!("stdin is not a terminal, console commands disabled");
        return;
    }
    log::info!("Press 'r' + Enter to restart the worker");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = running.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if is_restart_command(&line) => {
                log::info!("Restart requested from console");
                match orchestrator.restart().await {
                    Ok(attempt) => log::info!(
                        "Console restart finished: {}",
                        attempt.outcome.message()
                    ),
                    Err(e) => log::warn!("Console restart not started: {e}"),
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to read console input: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_r_triggers_restart() {
        assert!(is_restart_command("r"));
        assert!(is_restart_command(" R \n"));
        assert!(!is_restart_command("restart"));
        assert!(!is_restart_command(""));
    }
}
