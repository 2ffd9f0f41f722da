use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "comfy-launcher", version, about = "Supervisor and self-updater for a ComfyUI worker")]
pub struct Cli {
    /// Installation root. Defaults to the executable's directory.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve the control API and monitor the worker (default).
    Run {
        /// Override `api_port` from launcher.toml.
        #[arg(long)]
        api_port: Option<u16>,
    },
    /// Record how the worker was launched.
    Snapshot {
        #[arg(long)]
        script: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long)]
        interpreter: Option<String>,
        /// PID of the worker that is already running.
        #[arg(long)]
        pid: Option<u32>,
        /// Worker arguments, after `--`.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Apply a staged update and exit.
    ApplyUpdate,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Run { api_port: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::parse_from(["comfy-launcher", "--root", "/opt/comfy"]);
        assert_eq!(cli.root, Some(PathBuf::from("/opt/comfy")));
        assert!(matches!(cli.command(), Command::Run { api_port: None }));
    }

    #[test]
    fn snapshot_collects_trailing_worker_args() {
        let cli = Cli::parse_from([
            "comfy-launcher",
            "snapshot",
            "--script",
            "main.py",
            "--port",
            "8188",
            "--",
            "--listen",
            "--port",
            "8188",
        ]);
        let Command::Snapshot {
            script, port, args, ..
        } = cli.command()
        else {
            panic!("expected snapshot");
        };
        assert_eq!(script, "main.py");
        assert_eq!(port, 8188);
        assert_eq!(args, vec!["--listen", "--port", "8188"]);
    }
}
