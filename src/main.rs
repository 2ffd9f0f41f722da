use std::process::ExitCode;
use std::time::Duration;

use chrono::Local;
use clap::Parser as _;

use comfy_launcher::cli::{Cli, Command};
use comfy_launcher::config::{load_config, LaunchSnapshot};
use comfy_launcher::error::{AppError, Result};
use comfy_launcher::launcher::Launcher;
use comfy_launcher::logging::init_logging;
use comfy_launcher::paths::LauncherPaths;
use comfy_launcher::update::{apply_staged_update, publish_version_to_web, BootstrapOutcome};

/// Blocking tasks (the console's stdin read) may never finish on their own.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let cli = Cli::parse();
    match launch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Errors before logging is installed would otherwise be lost.
            if log::max_level() == log::LevelFilter::Off {
                eprintln!("comfy-launcher: {e}");
            } else {
                log::error!("{e}");
            }
            ExitCode::FAILURE
        }
    }
}

fn launch(cli: &Cli) -> Result<()> {
    let paths = LauncherPaths::discover(cli.root.as_deref())?;
    paths.ensure_root()?;
    let mut config = load_config(&paths.config_path())?;
    let logs = init_logging(config.log_buffer_size, Some(paths.launcher_log()));

    match cli.command() {
        Command::Snapshot {
            script,
            port,
            cwd,
            interpreter,
            pid,
            args,
        } => {
            let snapshot = LaunchSnapshot {
                args,
                cwd,
                saved_at: Local::now().to_rfc3339(),
                script,
                port,
                interpreter,
                pid,
            };
            snapshot.save(&paths)?;
            log::info!(
                "Launch snapshot written to {}",
                paths.launch_snapshot().display()
            );
            Ok(())
        }
        Command::ApplyUpdate => bootstrap(&paths, &config.web_dir),
        Command::Run { api_port } => {
            if let Some(port) = api_port {
                config.api_port = port;
            }
            if let Err(e) = bootstrap(&paths, &config.web_dir) {
                log::error!("Failed to apply staged update, starting the installed version: {e}");
            }
            let snapshot = LaunchSnapshot::load(&paths)?;
            log::info!(
                "Supervising {} on port {} (root: {})",
                snapshot.script,
                snapshot.port,
                paths.root().display()
            );

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| AppError::other(format!("Failed to start async runtime: {e}")))?;
            let result = runtime.block_on(async move {
                let launcher = Launcher::new(config, paths, snapshot, logs)?;
                launcher.run().await
            });
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
            result
        }
    }
}

/// Apply a staged update, then expose the installed version to the web UI.
fn bootstrap(paths: &LauncherPaths, web_dir: &str) -> Result<()> {
    match apply_staged_update(paths)? {
        BootstrapOutcome::Applied { version, .. } => log::info!(
            "Now running version {}",
            version.as_deref().unwrap_or("(unknown)")
        ),
        BootstrapOutcome::Incomplete | BootstrapOutcome::NothingStaged => {}
    }
    publish_version_to_web(paths, web_dir);
    Ok(())
}
