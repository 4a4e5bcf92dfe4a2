//! Interval scheduling for the maintenance sweep, with on-demand runs.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::sweep::{MaintenanceSweep, SweepReport};
use crate::config::SweepConfig;

/// Interval-based schedule specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSchedule {
    /// Duration between executions
    pub interval: Duration,
    /// Whether to run immediately on start
    pub run_immediately: bool,
}

impl IntervalSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            run_immediately: false,
        }
    }

    pub fn with_immediate(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            interval: config.interval,
            run_immediately: config.run_on_start,
        }
    }
}

/// Handle for a running sweep task.
pub struct SweepHandle {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    last_report: watch::Receiver<Option<SweepReport>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Ask for a sweep now. Requests made while a sweep runs collapse into
    /// one follow-up run.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Report of the most recent finished sweep.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.borrow().clone()
    }

    /// Receiver that changes after every finished sweep.
    pub fn subscribe(&self) -> watch::Receiver<Option<SweepReport>> {
        self.last_report.clone()
    }

    /// Stop the task; an in-flight sweep stops after its current sale.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweep task failed");
        }
    }
}

/// Run `sweep` on `schedule` until `cancel` fires.
///
/// `cancel` is usually a child of the process-wide shutdown token.
pub fn spawn_sweep(
    sweep: MaintenanceSweep,
    schedule: IntervalSchedule,
    cancel: CancellationToken,
) -> SweepHandle {
    let trigger = Arc::new(Notify::new());
    let (report_tx, report_rx) = watch::channel(None);
    let task_trigger = trigger.clone();
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(schedule.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        if !schedule.run_immediately {
            ticker.tick().await;
        }

        info!(
            interval_ms = schedule.interval.as_millis() as u64,
            "Maintenance sweep scheduled"
        );

        loop {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = task_trigger.notified() => {
                    info!("On-demand sweep requested");
                }
            }

            match sweep.run_once(&task_cancel).await {
                Ok(report) => {
                    let _ = report_tx.send(Some(report));
                }
                Err(err) => {
                    error!(error_code = %err.code(), error = %err, "Maintenance sweep failed");
                }
            }
        }

        info!("Maintenance sweep stopped");
    });

    SweepHandle {
        trigger,
        cancel,
        last_report: report_rx,
        task,
    }
}
