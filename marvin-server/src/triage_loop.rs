use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use marvin_core::sweep_installations;

use crate::AppState;

/// Serializes triage sweeps and bounds each one by a deadline.
pub struct TriageRunner {
    lock: Mutex<()>,
    deadline: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SweepOutcome<T> {
    Completed(T),
    AlreadyRunning,
    TimedOut,
}

impl TriageRunner {
    pub fn new(deadline: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            deadline,
        }
    }

    /// Run `sweep` unless another sweep holds the lock.
    pub async fn try_run<F: Future>(&self, sweep: F) -> SweepOutcome<F::Output> {
        let Ok(_guard) = self.lock.try_lock() else {
            return SweepOutcome::AlreadyRunning;
        };
        match tokio::time::timeout(self.deadline, sweep).await {
            Ok(output) => SweepOutcome::Completed(output),
            Err(_) => SweepOutcome::TimedOut,
        }
    }
}

/// Sweep every installation once, unless a sweep is already in flight.
pub async fn trigger_triage(state: Arc<AppState>) {
    let sweep = sweep_installations(
        &state.github_client,
        state.selector.as_ref(),
        &state.workflow,
        Utc::now(),
    );

    match state.triage.try_run(sweep).await {
        SweepOutcome::Completed(Ok(report)) => info!(
            "Triage complete: {} repositories, {} transitions, {} failures",
            report.repositories.len(),
            report.transitioned(),
            report.failed()
        ),
        SweepOutcome::Completed(Err(e)) => error!("Triage failed: {:#}", e),
        SweepOutcome::AlreadyRunning => info!("Triage already running, ignoring trigger"),
        SweepOutcome::TimedOut => warn!(
            "Triage exceeded its deadline of {}s and was abandoned",
            state.triage.deadline.as_secs()
        ),
    }
}

pub async fn triage_loop(state: Arc<AppState>, period: Duration) {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        trigger_triage(state.clone()).await;
    }
}
