//! Integration tests for sale settlement and withdrawals.
//!
//! Tests cover:
//! - Primary author and dependency shares
//! - At-most-once settlement, sequential and concurrent
//! - Completing sales settled while the artifact source was down
//! - Placeholder publications
//! - Parameter updates applied at settlement time
//! - Price cap and zero-amount allocations
//! - All-or-nothing withdrawal

mod common;

use common::*;

use cascade_core::error::ErrorCode;
use cascade_core::graph::StaticArtifactSource;
use cascade_core::ledger::SettlementResult;
use cascade_core::types::Amount;

// ============================================================================
// Allocation
// ============================================================================

#[tokio::test]
async fn test_artifact_without_dependencies_pays_author_alone() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();

    let sale = sold(1, FIVE_ETH, "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    assert_eq!(
        h.ledger.pending_balance("0xa").await.unwrap(),
        amount("500000000000000000")
    );
    let rows = h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].depth, 0);
    assert_eq!(rows[0].rate_bps, 1000);

    let stored = h.db.get_sale(&sale_id(&sale)).await.unwrap().unwrap();
    assert!(stored.settled);
    assert_eq!(stored.royalty_amount.as_deref(), Some("500000000000000000"));
    assert_eq!(stored.closure_complete, Some(true));
}

#[tokio::test]
async fn test_dependency_share_follows_decay() {
    let source = StaticArtifactSource::new().with_artifact(artifact(1), None, vec![artifact(2)]);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    h.processor.process(&published(2, "0xb", "0xp2")).await.unwrap();

    let sale = sold(1, FIVE_ETH, "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    assert_eq!(
        h.ledger.pending_balance("0xa").await.unwrap(),
        amount("500000000000000000")
    );
    assert_eq!(
        h.ledger.pending_balance("0xb").await.unwrap(),
        amount("325000000000000000")
    );

    let rows = h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap();
    let beneficiaries: Vec<&str> = rows.iter().map(|r| r.beneficiary.as_str()).collect();
    assert_eq!(beneficiaries, vec!["0xa", "0xb"]);
    assert_eq!(rows[1].rate_bps, 650);
}

#[tokio::test]
async fn test_allocations_never_exceed_price() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2)])
        .with_artifact(artifact(2), None, vec![artifact(3)]);
    let h = harness_with(source, 4096).await;
    for (id, author, tx) in [(1, "0xa", "0xp1"), (2, "0xb", "0xp2"), (3, "0xc", "0xp3")] {
        h.processor.process(&published(id, author, tx)).await.unwrap();
    }
    h.processor
        .process(&parameters_updated(100, 100, 50, "0xparams"))
        .await
        .unwrap();

    let sale = sold(1, "1000", "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    let rows = h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap();
    let total: Amount = rows.iter().map(|r| amount(&r.amount)).fold(Amount::zero(), |acc, a| acc + &a);
    assert_eq!(total, amount("1000"));
    assert_eq!(h.ledger.pending_balance("0xa").await.unwrap(), amount("1000"));
    assert!(h.ledger.pending_balance("0xb").await.unwrap().is_zero());
}

#[tokio::test]
async fn test_zero_amount_rows_are_kept_without_credit() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();

    let sale = sold(1, "9", "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    let rows = h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount, "0");

    let err = h.ledger.withdraw("0xa").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NothingToWithdraw);
}

// ============================================================================
// At-Most-Once Settlement
// ============================================================================

#[tokio::test]
async fn test_settle_twice_is_noop() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    let sale = sold(1, FIVE_ETH, "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    let before = h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap();
    let result = h.ledger.settle(&sale_id(&sale)).await.unwrap();

    assert_eq!(result, SettlementResult::AlreadySettled);
    assert_eq!(h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap().len(), before.len());
    assert_eq!(
        h.ledger.pending_balance("0xa").await.unwrap(),
        amount("500000000000000000")
    );
}

#[tokio::test]
async fn test_concurrent_settlement_credits_once() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, FIVE_ETH, "0xa").await;

    let (first, second) = tokio::join!(h.ledger.settle("sale-1"), h.ledger.settle("sale-1"));
    let settled_now = [first.unwrap(), second.unwrap()]
        .iter()
        .filter(|r| r.is_settled_now())
        .count();

    assert_eq!(settled_now, 1);
    assert_eq!(h.db.allocations_for_sale("sale-1").await.unwrap().len(), 1);
    assert_eq!(
        h.ledger.pending_balance("0xa").await.unwrap(),
        amount("500000000000000000")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_settlement_over_pooled_connections_credits_once() {
    let (_dir, h) = file_harness(8).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    let sales: Vec<String> = (0..20).map(|i| format!("sale-{}", i)).collect();
    for id in &sales {
        record_unsettled_sale(&h.db, id, 1, "1000000000000000000", "0xa").await;
    }

    let mut workers = Vec::new();
    for _ in 0..4 {
        let ledger = h.ledger.clone();
        let sales = sales.clone();
        workers.push(tokio::spawn(async move {
            let mut settled_now = 0;
            for id in &sales {
                if ledger.settle(id).await.unwrap().is_settled_now() {
                    settled_now += 1;
                }
            }
            settled_now
        }));
    }
    let mut settled_now = 0;
    for worker in workers {
        settled_now += worker.await.unwrap();
    }

    assert_eq!(settled_now, 20);
    for id in &sales {
        assert_eq!(h.db.allocations_for_sale(id).await.unwrap().len(), 1);
    }
    assert_eq!(
        h.ledger.pending_balance("0xa").await.unwrap(),
        amount("2000000000000000000")
    );
}

#[tokio::test]
async fn test_unknown_sale_is_not_found() {
    let h = harness().await;

    let err = h.ledger.settle("missing").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::RecordNotFound);
}

#[tokio::test]
async fn test_upstream_failure_settles_author_first() {
    let source = StaticArtifactSource::new().with_artifact(artifact(1), None, vec![artifact(2)]);
    source.set_failing(artifact(1), true);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, FIVE_ETH, "0xa").await;

    let result = h.ledger.settle("sale-1").await.unwrap();

    let SettlementResult::Settled(summary) = result else {
        panic!("expected settlement");
    };
    assert!(!summary.closure_complete);
    assert_eq!(summary.allocations.len(), 1);
    assert_eq!(summary.allocations[0].beneficiary, "0xa");

    let stored = h.db.get_sale("sale-1").await.unwrap().unwrap();
    assert_eq!(stored.closure_complete, Some(false));
    assert!(stored.awaiting_upstream);
}

#[tokio::test]
async fn test_complete_partial_pays_missing_dependency_once() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), Some("0xa"), vec![artifact(2)])
        .with_artifact(artifact(2), Some("0xb"), vec![]);
    source.set_failing(artifact(1), true);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    h.processor.process(&published(2, "0xb", "0xp2")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, FIVE_ETH, "0xa").await;
    h.ledger.settle("sale-1").await.unwrap();
    h.source.set_failing(artifact(1), false);

    let result = h.ledger.complete_partial("sale-1").await.unwrap();

    let SettlementResult::Supplemented(summary) = result else {
        panic!("expected supplement");
    };
    assert!(summary.closure_complete);
    assert_eq!(summary.allocations.len(), 1);
    assert_eq!(summary.allocations[0].beneficiary, "0xb");
    assert_eq!(summary.total, amount("825000000000000000"));
    assert_eq!(
        h.ledger.pending_balance("0xa").await.unwrap(),
        amount("500000000000000000")
    );
    assert_eq!(
        h.ledger.pending_balance("0xb").await.unwrap(),
        amount("325000000000000000")
    );

    let again = h.ledger.complete_partial("sale-1").await.unwrap();
    assert_eq!(again, SettlementResult::AlreadySettled);
    assert_eq!(
        h.ledger.pending_balance("0xb").await.unwrap(),
        amount("325000000000000000")
    );
    let stored = h.db.get_sale("sale-1").await.unwrap().unwrap();
    assert_eq!(stored.royalty_amount.as_deref(), Some("825000000000000000"));
    assert!(!stored.awaiting_upstream);
}

#[tokio::test]
async fn test_complete_partial_caps_to_unpaid_price() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), Some("0xa"), vec![artifact(2)])
        .with_artifact(artifact(2), Some("0xb"), vec![]);
    source.set_failing(artifact(1), true);
    let h = harness_with(source, 4096).await;
    h.processor.process(&parameters_updated(100, 100, 1, "0xparams")).await.unwrap();
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    h.processor.process(&published(2, "0xb", "0xp2")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, "1000", "0xa").await;
    h.ledger.settle("sale-1").await.unwrap();
    h.source.set_failing(artifact(1), false);

    h.ledger.complete_partial("sale-1").await.unwrap();

    assert_eq!(h.ledger.pending_balance("0xa").await.unwrap(), amount("1000"));
    let rows = h.db.allocations_for_sale("sale-1").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].amount, "0");
    let stored = h.db.get_sale("sale-1").await.unwrap().unwrap();
    assert_eq!(stored.royalty_amount.as_deref(), Some("1000"));
}

// ============================================================================
// Placeholders & Parameters
// ============================================================================

#[tokio::test]
async fn test_unpublished_artifact_credits_seller_with_placeholder() {
    let h = harness().await;
    h.processor.process(&sold(7, FIVE_ETH, "0xseller", "0xs7")).await.unwrap();

    assert_eq!(
        h.ledger.pending_balance("0xseller").await.unwrap(),
        amount("500000000000000000")
    );
    let placeholder = h.db.get_publication(&artifact(7)).await.unwrap().unwrap();
    assert!(placeholder.placeholder);
    assert_eq!(placeholder.author, "0xseller");

    h.processor.process(&published(7, "0xreal", "0xp7")).await.unwrap();
    let real = h.db.get_publication(&artifact(7)).await.unwrap().unwrap();
    assert!(!real.placeholder);
    assert_eq!(real.author, "0xreal");
}

#[tokio::test]
async fn test_dependency_author_from_source() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2), artifact(3)])
        .with_artifact(artifact(2), Some("0xb"), vec![]);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();

    let sale = sold(1, FIVE_ETH, "0xa", "0xs1");
    h.processor.process(&sale).await.unwrap();

    let rows = h.db.allocations_for_sale(&sale_id(&sale)).await.unwrap();
    let beneficiaries: Vec<&str> = rows.iter().map(|r| r.beneficiary.as_str()).collect();
    // Artifact 3 has no author anywhere and earns nothing.
    assert_eq!(beneficiaries, vec!["0xa", "0xb"]);
    let b = h.db.get_publication(&artifact(2)).await.unwrap().unwrap();
    assert!(b.placeholder);
}

#[tokio::test]
async fn test_latest_parameters_apply_at_settlement() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    record_unsettled_sale(&h.db, "sale-1", 1, "1000", "0xa").await;

    h.processor
        .process(&parameters_updated(20, 50, 300, "0xparams"))
        .await
        .unwrap();
    h.ledger.settle("sale-1").await.unwrap();

    assert_eq!(h.ledger.pending_balance("0xa").await.unwrap(), amount("200"));
    let current = h.ledger.current_parameters().await.unwrap();
    assert_eq!(current.initial_rate, 20);
    assert_eq!(current.decay_factor, 50);
}

// ============================================================================
// Withdrawal
// ============================================================================

#[tokio::test]
async fn test_withdraw_drains_balance_once() {
    let h = harness().await;
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    h.processor.process(&sold(1, FIVE_ETH, "0xa", "0xs1")).await.unwrap();

    let paid = h.ledger.withdraw("0xa").await.unwrap();
    assert_eq!(paid, amount("500000000000000000"));
    assert!(h.ledger.pending_balance("0xa").await.unwrap().is_zero());

    let err = h.ledger.withdraw("0xa").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NothingToWithdraw);

    let history = h.db.withdrawals("0xa").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, "500000000000000000");
}

#[tokio::test]
async fn test_withdraw_unknown_beneficiary_fails() {
    let h = harness().await;

    let err = h.ledger.withdraw("0xnobody").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::NothingToWithdraw);
}
