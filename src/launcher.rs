//! Owns every launcher component for the lifetime of `run`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::{LaunchSnapshot, LauncherConfig};
use crate::console::run_console;
use crate::error::{AppError, Result};
use crate::listener::{access_urls, advertised_hosts, tls, ControlListener, Protocol};
use crate::logging::LogBuffer;
use crate::monitor::run_monitor;
use crate::paths::LauncherPaths;
use crate::process::{HttpProbe, WorkerCommand, WorkerController};
use crate::restart::{HealthProbe, RestartAttempt, RestartOrchestrator, WorkerControl};
use crate::update::UpdateManager;

/// Delay between acknowledging a shutdown request and acting on it, so the
/// response can reach the client.
const SHUTDOWN_DELAY: Duration = Duration::from_secs(1);

const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct LauncherStatus {
    pub running: bool,
    pub check_interval: u64,
    pub mode: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub port: u16,
    pub responsive: bool,
    pub process_running: bool,
    pub process_pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiStatus {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub launcher: LauncherStatus,
    pub worker: WorkerStatus,
    pub api: ApiStatus,
    pub timestamp: String,
    /// Same as `launcher`, kept for older web UI builds.
    pub watchdog: LauncherStatus,
}

pub struct Launcher {
    config: LauncherConfig,
    paths: LauncherPaths,
    snapshot: LaunchSnapshot,
    logs: Arc<LogBuffer>,
    controller: Arc<WorkerController>,
    probe: Arc<HttpProbe>,
    restarts: Arc<RestartOrchestrator>,
    updates: Arc<UpdateManager>,
    tls: Option<TlsAcceptor>,
    running: CancellationToken,
}

impl Launcher {
    pub fn new(
        config: LauncherConfig,
        paths: LauncherPaths,
        snapshot: LaunchSnapshot,
        logs: Arc<LogBuffer>,
    ) -> Result<Arc<Self>> {
        let tls_files = snapshot.tls_files();
        let probe = Arc::new(HttpProbe::new(
            snapshot.port,
            tls_files.is_some(),
            config.probe_timeout(),
        )?);
        let tls = tls::load_acceptor(tls_files.as_ref());

        let command = WorkerCommand {
            interpreter: snapshot.interpreter(),
            script: snapshot.resolved_script(&paths),
            args: snapshot.args.clone(),
            cwd: snapshot.working_dir(&paths),
            port: snapshot.port,
        };
        let controller = Arc::new(WorkerController::new(
            command,
            paths.clone(),
            &config.self_markers,
        ));
        if let Some(arg) = controller.self_reference() {
            log::warn!("Worker command references the launcher itself ({arg}), restarts will be refused");
        }

        let running = CancellationToken::new();
        let restarts = Arc::new(RestartOrchestrator::new(
            Arc::clone(&controller) as Arc<dyn WorkerControl>,
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
            config.restart.clone(),
            running.clone(),
        ));
        let updates = UpdateManager::new(paths.clone(), &config)?;

        Ok(Arc::new(Self {
            config,
            paths,
            snapshot,
            logs,
            controller,
            probe,
            restarts,
            updates,
            tls,
            running,
        }))
    }

    pub fn paths(&self) -> &LauncherPaths {
        &self.paths
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn updates(&self) -> &Arc<UpdateManager> {
        &self.updates
    }

    pub fn web_root(&self) -> PathBuf {
        self.paths.web_dir(&self.config.web_dir)
    }

    pub fn protocol(&self) -> Protocol {
        if self.tls.is_some() {
            Protocol::Dual
        } else {
            Protocol::Http
        }
    }

    pub fn running(&self) -> &CancellationToken {
        &self.running
    }

    /// Run a restart to completion. The sequence runs on its own task, so a
    /// caller that goes away (a disconnected HTTP client) only stops waiting.
    pub async fn manual_restart(&self) -> Result<RestartAttempt> {
        let restarts = Arc::clone(&self.restarts);
        tokio::spawn(async move { restarts.restart().await })
            .await
            .map_err(|e| AppError::other(format!("Restart task failed: {e}")))?
    }

    /// Cancel the launcher after [`SHUTDOWN_DELAY`].
    pub fn request_shutdown(&self) {
        let running = self.running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_DELAY).await;
            log::info!("Shutting down on request");
            running.cancel();
        });
    }

    pub async fn status_report(&self) -> StatusReport {
        let launcher = LauncherStatus {
            running: !self.running.is_cancelled(),
            check_interval: self.config.check_interval_secs,
            mode: "monitor_only",
        };
        let process = self.controller.process_status().await;
        StatusReport {
            worker: WorkerStatus {
                port: self.snapshot.port,
                responsive: self.probe.is_responsive().await,
                process_running: process.running,
                process_pid: process.pid,
            },
            api: ApiStatus {
                enabled: true,
                host: self.config.api_host.clone(),
                port: self.config.api_port,
                version: self.updates.current_version(),
                protocol: self.protocol(),
            },
            timestamp: Local::now().to_rfc3339(),
            watchdog: launcher.clone(),
            launcher,
        }
    }

    /// Serve the control API and monitor the worker until cancelled, then
    /// shut down in order: listener first, worker last.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let router = api::router(Arc::clone(&self));
        let listener = ControlListener::bind(
            &self.config.api_host,
            self.config.api_port,
            router,
            self.tls.clone(),
        )
        .await?;
        let addr = listener.local_addr()?;
        log::info!(
            "Control API listening on {addr} ({})",
            listener.protocol().as_str()
        );
        for access in access_urls(&advertised_hosts(addr.ip()), addr.port(), listener.protocol()) {
            log::info!("  {:<17}: {}", access.label, access.url);
        }

        if let Some(pid) = self.snapshot.pid {
            self.controller.adopt_pid(pid);
        }

        let listener_task = tokio::spawn(listener.run(self.running.clone()));
        let console_task = self.config.console.then(|| {
            tokio::spawn(run_console(
                Arc::clone(&self.restarts),
                self.running.clone(),
            ))
        });
        let signal_token = self.running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, shutting down");
                signal_token.cancel();
            }
        });

        run_monitor(
            Arc::clone(&self.probe) as Arc<dyn HealthProbe>,
            self.snapshot.port,
            self.config.initial_check_interval(),
            self.config.check_interval(),
            self.running.clone(),
        )
        .await;

        self.shutdown(listener_task).await;
        if let Some(task) = console_task {
            task.abort();
        }
        Ok(())
    }

    async fn shutdown(&self, listener_task: tokio::task::JoinHandle<()>) {
        self.running.cancel();
        match tokio::time::timeout(LISTENER_STOP_TIMEOUT, listener_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Control API task failed: {e}"),
            Err(_) => log::warn!("Control API did not stop within {}s", LISTENER_STOP_TIMEOUT.as_secs()),
        }
        if !self.controller.stop().await {
            log::warn!("Worker did not stop cleanly");
        }
        log::info!("Launcher stopped");
    }
}
