//! Periodic worker liveness monitor. Observes only; restarts stay manual.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::restart::HealthProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Up,
    Down,
}

/// Remembers the last probe result so transitions are logged once.
#[derive(Debug, Default)]
pub struct MonitorState {
    last: Option<bool>,
    seen_responsive: bool,
}

impl MonitorState {
    pub fn observe(&mut self, responsive: bool) -> Option<Transition> {
        let previous = self.last.replace(responsive);
        if responsive {
            self.seen_responsive = true;
        }
        match (previous, responsive) {
            (Some(false) | None, true) => Some(Transition::Up),
            (Some(true) | None, false) => Some(Transition::Down),
            _ => None,
        }
    }

    /// Fast polling until the worker has answered once.
    pub fn next_interval(&self, initial: Duration, steady: Duration) -> Duration {
        if self.seen_responsive {
            steady
        } else {
            initial
        }
    }
}

/// Probe the worker until `running` is cancelled.
pub async fn run_monitor(
    probe: Arc<dyn HealthProbe>,
    port: u16,
    initial_interval: Duration,
    interval: Duration,
    running: CancellationToken,
) {
    let mut state = MonitorState::default();
    log::info!(
        "Monitoring worker on port {port} (every {}s until first seen, then every {}s)",
        initial_interval.as_secs(),
        interval.as_secs()
    );

    loop {
        if running.is_cancelled() {
            break;
        }
        let responsive = probe.is_responsive().await;
        match state.observe(responsive) {
            Some(Transition::Up) => log::info!("Worker on port {port} is responsive"),
            Some(Transition::Down) => log::warn!(
                "Worker on port {port} is not responsive - waiting for manual restart"
            ),
            None => {}
        }

        let wait = state.next_interval(initial_interval, interval);
        tokio::select! {
            () = running.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
    }
    log::debug!("Worker monitor stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[test]
    fn transitions_are_reported_once() {
        let mut state = MonitorState::default();
        assert_eq!(state.observe(false), Some(Transition::Down));
        assert_eq!(state.observe(false), None);
        assert_eq!(state.observe(true), Some(Transition::Up));
        assert_eq!(state.observe(true), None);
        assert_eq!(state.observe(false), Some(Transition::Down));
    }

    struct CountingProbe {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for CountingProbe {
        async fn is_responsive(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_fast_until_first_seen_then_slows_down() {
        let probe = Arc::new(CountingProbe {
            up: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        let task = tokio::spawn(run_monitor(
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
            8188,
            Duration::from_secs(5),
            Duration::from_secs(30),
            token.clone(),
        ));

        // Probes at t = 0, 5, 10.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

        // Seen at t = 15, next probe at t = 45.
        probe.up.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);

        token.cancel();
        task.await.unwrap();
    }
}
