//! Integration tests for the maintenance sweep.

mod common;

use common::*;

use std::time::Duration;

use cascade_core::graph::StaticArtifactSource;
use cascade_core::jobs::{spawn_sweep, IntervalSchedule, MaintenanceSweep};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_sweep_settles_pending_sales() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, "1000", "0xa").await;
    let sweep = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);

    let report = sweep.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.ledger.pending_balance("0xa").await.unwrap(), amount("100"));

    let again = sweep.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.scanned, 0);
}

#[tokio::test]
async fn test_one_failing_sale_does_not_stop_the_sweep() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-bad", 1, "1000", "0xa").await;
    record_unsettled_sale(&h.db, "sale-good", 1, "2000", "0xa").await;
    sqlx::query("UPDATE sales SET price = 'not-a-number' WHERE id = 'sale-bad'")
        .execute(h.db.pool())
        .await
        .unwrap();
    let sweep = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);

    let report = sweep.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 1);
    assert!(h.db.get_sale("sale-good").await.unwrap().unwrap().settled);
    assert!(!h.db.get_sale("sale-bad").await.unwrap().unwrap().settled);
}

#[tokio::test]
async fn test_overlapping_sweeps_settle_each_sale_once() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    for id in ["sale-1", "sale-2", "sale-3"] {
        record_unsettled_sale(&h.db, id, 1, "1000", "0xa").await;
    }
    let first = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);
    let second = first.clone();
    let token = CancellationToken::new();

    let (a, b) = tokio::join!(first.run_once(&token), second.run_once(&token));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.settled + b.settled, 3);
    assert_eq!(a.failed + b.failed, 0);
    assert_eq!(h.ledger.pending_balance("0xa").await.unwrap(), amount("300"));
}

#[tokio::test]
async fn test_sweep_completes_sale_settled_during_outage() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), Some("0xa"), vec![artifact(2)])
        .with_artifact(artifact(2), Some("0xb"), vec![]);
    source.set_failing(artifact(1), true);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    h.processor.process(&published(2, "0xb", "0xp2")).await.unwrap();
    let sale = sold(1, FIVE_ETH, "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    let stored = h.db.get_sale(&sale_id(&sale)).await.unwrap().unwrap();
    assert!(stored.settled);
    assert_eq!(stored.closure_complete, Some(false));
    assert!(h.ledger.pending_balance("0xb").await.unwrap().is_zero());

    h.source.set_failing(artifact(1), false);
    let sweep = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);
    let report = sweep.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.scanned, 0);
    assert_eq!(report.partial_scanned, 1);
    assert_eq!(report.reattempted, 1);
    assert_eq!(report.incomplete, 0);
    assert_eq!(
        h.ledger.pending_balance("0xb").await.unwrap(),
        amount("325000000000000000")
    );
    let stored = h.db.get_sale(&sale_id(&sale)).await.unwrap().unwrap();
    assert_eq!(stored.closure_complete, Some(true));
    assert_eq!(stored.royalty_amount.as_deref(), Some("825000000000000000"));

    let again = sweep.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.partial_scanned, 0);
    assert_eq!(
        h.ledger.pending_balance("0xb").await.unwrap(),
        amount("325000000000000000")
    );
}

#[tokio::test]
async fn test_sweep_keeps_retrying_while_source_is_down() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), Some("0xa"), vec![artifact(2)])
        .with_artifact(artifact(2), Some("0xb"), vec![]);
    source.set_failing(artifact(1), true);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    h.processor.process(&sold(1, FIVE_ETH, "0xa", "0xs1")).await.unwrap();
    let sweep = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);

    let report = sweep.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.partial_scanned, 1);
    assert_eq!(report.reattempted, 1);
    assert_eq!(report.incomplete, 1);
    let again = sweep.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.partial_scanned, 1);
}

#[tokio::test]
async fn test_truncated_closure_is_not_retried() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), Some("0xa"), vec![artifact(2)])
        .with_artifact(artifact(2), Some("0xb"), vec![artifact(3)])
        .with_artifact(artifact(3), Some("0xc"), vec![]);
    let h = harness_with(source, 2).await;
    let sale = sold(1, FIVE_ETH, "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    let stored = h.db.get_sale(&sale_id(&sale)).await.unwrap().unwrap();
    assert_eq!(stored.closure_complete, Some(false));
    assert!(!stored.awaiting_upstream);

    let sweep = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);
    let report = sweep.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.partial_scanned, 0);
}

#[tokio::test]
async fn test_cancelled_sweep_stops_between_sales() {
    let h = harness().await;
    record_unsettled_sale(&h.db, "sale-1", 1, "1000", "0xa").await;
    let sweep = MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100);
    let token = CancellationToken::new();
    token.cancel();

    let report = sweep.run_once(&token).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.settled, 0);
    assert!(!h.db.get_sale("sale-1").await.unwrap().unwrap().settled);
}

#[tokio::test]
async fn test_triggered_sweep_reports() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, "1000", "0xa").await;

    let handle = spawn_sweep(
        MaintenanceSweep::new(h.db.clone(), h.ledger.clone(), 100),
        IntervalSchedule::new(Duration::from_secs(3600)),
        CancellationToken::new(),
    );
    let mut reports = handle.subscribe();
    handle.trigger();

    tokio::time::timeout(Duration::from_secs(5), reports.changed())
        .await
        .expect("sweep did not run")
        .unwrap();
    let report = handle.last_report().unwrap();
    assert_eq!(report.settled, 1);

    handle.shutdown().await;
    assert!(h.db.get_sale("sale-1").await.unwrap().unwrap().settled);
}
