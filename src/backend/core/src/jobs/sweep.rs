//! Maintenance sweep: settle every sale still marked unsettled, then give
//! sales settled while the artifact source was failing their missing
//! allocations.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{Database, SaleRow};
use crate::error::{CascadeError, Result};
use crate::graph::retry::is_upstream_failure;
use crate::ledger::{RoyaltyLedger, SettlementResult};
use crate::telemetry::SettlementMetrics;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Unsettled sales found.
    pub scanned: usize,
    /// Sales this sweep settled.
    pub settled: usize,
    /// Sales someone else settled first.
    pub already_settled: usize,
    /// Sales left on a partial closure after this sweep touched them.
    pub incomplete: usize,
    /// Settled sales found waiting on the artifact source.
    pub partial_scanned: usize,
    /// Partial sales whose closure was resolved again.
    pub reattempted: usize,
    /// Sales whose settlement failed; left for the next sweep.
    pub failed: usize,
    /// The sweep stopped early on shutdown.
    pub cancelled: bool,
}

/// Scans and settles unsettled sales.
///
/// Holds no lock: two sweeps may overlap and the settlement claim keeps each
/// sale settled once.
#[derive(Clone)]
pub struct MaintenanceSweep {
    db: Database,
    ledger: RoyaltyLedger,
    batch_size: u32,
}

impl MaintenanceSweep {
    pub fn new(db: Database, ledger: RoyaltyLedger, batch_size: u32) -> Self {
        Self {
            db,
            ledger,
            batch_size: batch_size.max(1),
        }
    }

    /// Run one sweep, oldest sale first. One sale failing never stops the
    /// others; cancellation is honoured between sales.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let limit = i64::from(self.batch_size);
        let sales = self.db.unsettled_sales(limit).await?;
        let mut report = SweepReport {
            scanned: sales.len(),
            ..SweepReport::default()
        };

        for sale in &sales {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = self.ledger.settle(&sale.id).await;
            report.record(sale, outcome);
        }

        if !report.cancelled {
            // Sales settled above already had their attempt this round.
            let partial: Vec<SaleRow> = self
                .db
                .partial_sales(limit)
                .await?
                .into_iter()
                .filter(|partial| !sales.iter().any(|sale| sale.id == partial.id))
                .collect();
            report.partial_scanned = partial.len();
            for sale in &partial {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                let outcome = self.ledger.complete_partial(&sale.id).await;
                report.record(sale, outcome);
            }
        }

        SettlementMetrics::record_sweep();
        if report.scanned > 0 || report.partial_scanned > 0 {
            info!(
                scanned = report.scanned,
                settled = report.settled,
                already_settled = report.already_settled,
                incomplete = report.incomplete,
                partial_scanned = report.partial_scanned,
                reattempted = report.reattempted,
                failed = report.failed,
                cancelled = report.cancelled,
                "Maintenance sweep finished"
            );
        }
        Ok(report)
    }
}

impl SweepReport {
    fn record(&mut self, sale: &SaleRow, outcome: Result<SettlementResult>) {
        match outcome {
            Ok(SettlementResult::Settled(summary)) => {
                self.settled += 1;
                if !summary.closure_complete {
                    self.incomplete += 1;
                }
            }
            Ok(SettlementResult::Supplemented(summary)) => {
                self.reattempted += 1;
                if !summary.closure_complete {
                    self.incomplete += 1;
                }
            }
            Ok(SettlementResult::AlreadySettled) => {
                debug!(sale_id = %sale.id, "Sale settled concurrently");
                self.already_settled += 1;
            }
            Err(err) => {
                self.failed += 1;
                log_failure(sale, &err);
            }
        }
    }
}

fn log_failure(sale: &SaleRow, err: &CascadeError) {
    if is_upstream_failure(err) {
        warn!(
            sale_id = %sale.id,
            error_code = %err.code(),
            error = %err,
            "Artifact source unavailable; sale left for the next sweep"
        );
    } else if err.code().is_storage_failure() {
        error!(
            sale_id = %sale.id,
            error_code = %err.code(),
            error = %err,
            "Store failed while sweeping sale"
        );
    } else {
        warn!(
            sale_id = %sale.id,
            error_code = %err.code(),
            error = %err,
            "Sweep could not settle sale"
        );
    }
}
