//! Manual restart sequence for the worker.
//!
//! `stop → wait → start → confirm alive → wait responsive`. Each step is
//! logged under the [`RESTART_TARGET`] target and recorded in the returned
//! [`RestartAttempt`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RestartTimings;
use crate::error::{AppError, Result};
use crate::logging::RESTART_TARGET;
use crate::process::ExitState;

/// Worker lifecycle operations the orchestrator drives.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    async fn start(&self) -> bool;
    async fn stop(&self) -> bool;
    async fn poll_exit(&self) -> ExitState;
    fn output_tail(&self, max_chars: usize) -> String;
}

/// Liveness check of the worker's network endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_responsive(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStep {
    Requested,
    Stopping,
    WaitingClean,
    Starting,
    ConfirmingAlive,
    WaitingResponsive,
    Finished,
}

impl fmt::Display for RestartStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Stopping => "stopping",
            Self::WaitingClean => "waiting_clean",
            Self::Starting => "starting",
            Self::ConfirmingAlive => "confirming_alive",
            Self::WaitingResponsive => "waiting_responsive",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartOutcome {
    Success,
    /// Process alive at the end of the window but never answered the probe.
    SoftSuccess,
    StartFailed,
    ExitedImmediately,
    DiedDuringStartup,
    TimedOutUnresponsive,
    Cancelled,
}

impl RestartOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SoftSuccess)
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::Success | Self::SoftSuccess => None,
            Self::StartFailed => Some("start failed"),
            Self::ExitedImmediately => Some("process exited immediately"),
            Self::DiedDuringStartup => Some("died during startup"),
            Self::TimedOutUnresponsive => Some("not responsive within startup window"),
            Self::Cancelled => Some("launcher shutting down"),
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Worker restarted and responsive",
            Self::SoftSuccess => "Worker restarted but not yet responsive",
            _ => "Worker restart failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: RestartStep,
    pub elapsed_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartAttempt {
    pub started_at: DateTime<Local>,
    pub steps: Vec<StepRecord>,
    pub stop_ms: u64,
    pub wait_ms: u64,
    pub start_ms: u64,
    pub responsive_wait_ms: Option<u64>,
    pub outcome: RestartOutcome,
    /// Tail of the worker output when the process died.
    pub diagnostics: Option<String>,
}

impl RestartAttempt {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

struct AttemptLog {
    started: Instant,
    steps: Vec<StepRecord>,
}

impl AttemptLog {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        millis(self.started.elapsed())
    }

    fn record(&mut self, level: log::Level, step: RestartStep, message: impl Into<String>) {
        let message = message.into();
        let elapsed_ms = self.elapsed_ms();
        log::log!(target: RESTART_TARGET, level, "[{step}] {message} (+{elapsed_ms} ms)");
        self.steps.push(StepRecord {
            step,
            elapsed_ms,
            message,
        });
    }

    fn info(&mut self, step: RestartStep, message: impl Into<String>) {
        self.record(log::Level::Info, step, message);
    }

    fn warn(&mut self, step: RestartStep, message: impl Into<String>) {
        self.record(log::Level::Warn, step, message);
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs one restart sequence at a time.
pub struct RestartOrchestrator {
    worker: Arc<dyn WorkerControl>,
    probe: Arc<dyn HealthProbe>,
    timings: RestartTimings,
    running: CancellationToken,
    gate: Mutex<()>,
}

impl RestartOrchestrator {
    pub fn new(
        worker: Arc<dyn WorkerControl>,
        probe: Arc<dyn HealthProbe>,
        timings: RestartTimings,
        running: CancellationToken,
    ) -> Self {
        Self {
            worker,
            probe,
            timings,
            running,
            gate: Mutex::new(()),
        }
    }

    pub fn is_restarting(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Run the restart sequence. Rejected while another one is running.
    pub async fn restart(&self) -> Result<RestartAttempt> {
        let Ok(_guard) = self.gate.try_lock() else {
            log::warn!(target: RESTART_TARGET, "Restart rejected: another restart is in progress");
            return Err(AppError::restart_in_progress());
        };
        Ok(self.run_sequence().await)
    }

    async fn run_sequence(&self) -> RestartAttempt {
        let started_at = Local::now();
        let mut trail = AttemptLog::new();
        trail.info(RestartStep::Requested, "Restart sequence started");

        let phase = Instant::now();
        trail.info(RestartStep::Stopping, "Stopping worker");
        if self.worker.stop().await {
            trail.info(RestartStep::Stopping, "Worker stopped");
        } else {
            trail.warn(RestartStep::Stopping, "Stop reported failure, continuing");
        }
        let stop_ms = millis(phase.elapsed());

        let phase = Instant::now();
        trail.info(
            RestartStep::WaitingClean,
            format!(
                "Waiting {} ms for clean shutdown",
                self.timings.clean_shutdown_wait_ms
            ),
        );
        tokio::time::sleep(self.timings.clean_shutdown_wait()).await;
        let wait_ms = millis(phase.elapsed());

        let phase = Instant::now();
        trail.info(RestartStep::Starting, "Starting worker");
        let started = self.worker.start().await;
        let start_ms = millis(phase.elapsed());

        let mut attempt = RestartAttempt {
            started_at,
            steps: Vec::new(),
            stop_ms,
            wait_ms,
            start_ms,
            responsive_wait_ms: None,
            outcome: RestartOutcome::StartFailed,
            diagnostics: None,
        };

        if started {
            attempt.outcome = self.confirm_and_wait(&mut trail, &mut attempt).await;
        }

        match attempt.outcome {
            RestartOutcome::Success => trail.info(RestartStep::Finished, "Restart succeeded"),
            RestartOutcome::SoftSuccess => trail.warn(
                RestartStep::Finished,
                "Worker is running but did not respond within the startup window",
            ),
            outcome => trail.record(
                log::Level::Error,
                RestartStep::Finished,
                format!(
                    "Restart failed: {}",
                    outcome.reason().unwrap_or("unknown")
                ),
            ),
        }

        attempt.steps = trail.steps;
        attempt
    }

    async fn confirm_and_wait(
        &self,
        trail: &mut AttemptLog,
        attempt: &mut RestartAttempt,
    ) -> RestartOutcome {
        trail.info(
            RestartStep::ConfirmingAlive,
            format!(
                "Waiting {} ms before checking the process",
                self.timings.alive_settle_ms
            ),
        );
        tokio::time::sleep(self.timings.alive_settle()).await;
        if let ExitState::Exited(code) = self.worker.poll_exit().await {
            trail.warn(
                RestartStep::ConfirmingAlive,
                format!("Process exited immediately (code: {code:?})"),
            );
            attempt.diagnostics = Some(self.worker.output_tail(self.timings.output_tail_chars));
            return RestartOutcome::ExitedImmediately;
        }

        let phase = Instant::now();
        trail.info(
            RestartStep::WaitingResponsive,
            format!(
                "Waiting up to {} ms for the worker to respond",
                self.timings.responsive_window_ms
            ),
        );
        let outcome = self.wait_responsive(trail, attempt).await;
        attempt.responsive_wait_ms = Some(millis(phase.elapsed()));
        outcome
    }

    async fn wait_responsive(
        &self,
        trail: &mut AttemptLog,
        attempt: &mut RestartAttempt,
    ) -> RestartOutcome {
        let deadline = Instant::now() + self.timings.responsive_window();
        loop {
            if self.running.is_cancelled() {
                return RestartOutcome::Cancelled;
            }
            if let ExitState::Exited(code) = self.worker.poll_exit().await {
                trail.warn(
                    RestartStep::WaitingResponsive,
                    format!("Process died during startup (code: {code:?})"),
                );
                attempt.diagnostics =
                    Some(self.worker.output_tail(self.timings.output_tail_chars));
                return RestartOutcome::DiedDuringStartup;
            }
            if self.probe.is_responsive().await {
                trail.info(RestartStep::WaitingResponsive, "Worker is responsive");
                return RestartOutcome::Success;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                () = self.running.cancelled() => return RestartOutcome::Cancelled,
                () = tokio::time::sleep(remaining.min(self.timings.poll_interval())) => {}
            }
        }

        if self.worker.poll_exit().await == ExitState::Running {
            RestartOutcome::SoftSuccess
        } else {
            RestartOutcome::TimedOutUnresponsive
        }
    }
}
