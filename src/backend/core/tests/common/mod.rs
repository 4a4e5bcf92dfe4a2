//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cascade_core::config::DatabaseConfig;
use cascade_core::db::{Database, NewSale};
use cascade_core::events::{EventPayload, EventProcessor, InboundEvent};
use cascade_core::graph::{DependencyResolver, RetryPolicy, StaticArtifactSource};
use cascade_core::ledger::RoyaltyLedger;
use cascade_core::royalty::RoyaltyCalculator;
use cascade_core::types::{Amount, ArtifactId};

pub const ORIGIN: &str = "0xrepo";

/// Five whole units with 18 decimals.
pub const FIVE_ETH: &str = "5000000000000000000";

/// Fully wired components over a private in-memory store.
pub struct Harness {
    pub db: Database,
    pub source: Arc<StaticArtifactSource>,
    pub resolver: DependencyResolver,
    pub ledger: RoyaltyLedger,
    pub processor: EventProcessor,
}

pub async fn harness() -> Harness {
    harness_with(StaticArtifactSource::new(), 4096).await
}

pub async fn harness_with(source: StaticArtifactSource, max_closure_size: usize) -> Harness {
    let db = Database::in_memory().await.unwrap();
    harness_on(db, source, max_closure_size)
}

/// Components over a WAL database file with a multi-connection pool, so
/// concurrent callers really hold separate connections. Keep the returned
/// directory alive for the duration of the test.
pub async fn file_harness(max_connections: u32) -> (tempfile::TempDir, Harness) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("cascade.db").display()),
        max_connections,
        busy_timeout: Duration::from_secs(10),
    };
    let db = Database::connect(&config).await.unwrap();
    (dir, harness_on(db, StaticArtifactSource::new(), 4096))
}

fn harness_on(db: Database, source: StaticArtifactSource, max_closure_size: usize) -> Harness {
    let source = Arc::new(source);
    let resolver = DependencyResolver::new(
        db.clone(),
        source.clone(),
        RetryPolicy::once(Duration::from_secs(1)),
        max_closure_size,
    );
    let ledger = RoyaltyLedger::new(db.clone(), resolver.clone(), RoyaltyCalculator::default());
    let processor = EventProcessor::new(db.clone(), ledger.clone());

    Harness {
        db,
        source,
        resolver,
        ledger,
        processor,
    }
}

pub fn artifact(local_id: u64) -> ArtifactId {
    ArtifactId::new(ORIGIN, local_id)
}

pub fn amount(value: &str) -> Amount {
    value.parse().unwrap()
}

pub fn published(local_id: u64, author: &str, tx_hash: &str) -> InboundEvent {
    InboundEvent::new(
        local_id,
        EventPayload::ArtifactPublished {
            origin: ORIGIN.to_string(),
            local_id,
            author: author.to_string(),
            publish_time: 1_700_000_000 + local_id as i64,
        },
    )
    .with_origin(tx_hash, 0)
}

pub fn sold(local_id: u64, price: &str, seller: &str, tx_hash: &str) -> InboundEvent {
    InboundEvent::new(
        100,
        EventPayload::SaleMade {
            origin: ORIGIN.to_string(),
            local_id,
            price: amount(price),
            timestamp: 1_700_100_000,
            buyer: "0xbuyer".to_string(),
            seller: seller.to_string(),
        },
    )
    .with_origin(tx_hash, 1)
}

pub fn parameters_updated(initial_rate: u32, decay_factor: u32, block: u64, tx_hash: &str) -> InboundEvent {
    InboundEvent::new(
        block,
        EventPayload::RoyaltyParametersUpdated {
            initial_rate,
            decay_factor,
            decay_period: 86_400,
        },
    )
    .with_origin(tx_hash, 2)
}

/// Event id a sale event is stored under.
pub fn sale_id(event: &InboundEvent) -> String {
    event.event_id().to_string()
}

/// Record a sale without settling it, as if settlement had crashed.
pub async fn record_unsettled_sale(db: &Database, id: &str, local_id: u64, price: &str, seller: &str) {
    let sale = NewSale {
        id: id.to_string(),
        artifact: artifact(local_id),
        price: amount(price),
        buyer: "0xbuyer".to_string(),
        seller: seller.to_string(),
        timestamp: 1_700_200_000,
        block_number: 200,
        synthetic_id: false,
    };
    let mut tx = db.begin().await.unwrap();
    assert!(Database::insert_sale(&mut tx, &sale).await.unwrap());
    tx.commit().await.unwrap();
}
