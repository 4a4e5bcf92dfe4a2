//! Event pipeline: a bounded channel feeding one consumer.
//!
//! Events are applied one at a time in arrival order. Each event's marker and
//! its fact write share one transaction; a sale is then settled inline, and a
//! settlement that fails is left for the maintenance sweep.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{Database, NewPublication, NewSale};
use crate::error::{CascadeError, Result};
use crate::events::{EventDeduplicator, EventPayload, InboundEvent};
use crate::ledger::RoyaltyLedger;
use crate::royalty::RoyaltyParameters;
use crate::telemetry::EventCounter;
use crate::types::ArtifactId;

/// Sending half of the pipeline.
pub type EventSender = mpsc::Sender<InboundEvent>;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The fact was recorded.
    Applied,
    /// The event id was seen before; nothing changed.
    Duplicate,
    /// The event was marked processed but its payload was refused.
    Rejected(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Processor
// ═══════════════════════════════════════════════════════════════════════════════

/// Applies single events against the store.
#[derive(Clone)]
pub struct EventProcessor {
    db: Database,
    dedup: EventDeduplicator,
    ledger: RoyaltyLedger,
}

impl EventProcessor {
    pub fn new(db: Database, ledger: RoyaltyLedger) -> Self {
        Self {
            dedup: EventDeduplicator::new(db.clone()),
            db,
            ledger,
        }
    }

    /// Apply one event. Storage failures are returned; everything else is an
    /// outcome.
    pub async fn process(&self, event: &InboundEvent) -> Result<EventOutcome> {
        let event_id = event.event_id();
        let kind = event.payload.kind();

        let mut tx = self.db.begin().await?;
        if !self.dedup.mark_processed(&mut tx, &event_id).await? {
            tx.rollback().await?;
            let duplicate = CascadeError::duplicate_event(event_id.to_string());
            debug!(
                event_id = %event_id,
                kind = kind,
                error_code = %duplicate.code(),
                "Duplicate event ignored"
            );
            EventCounter::increment(kind, "duplicate");
            return Ok(EventOutcome::Duplicate);
        }

        if let Err(err) = validate(&event.payload) {
            tx.commit().await?;
            warn!(
                event_id = %event_id,
                kind = kind,
                error_code = %err.code(),
                reason = %err.user_message(),
                "Event rejected"
            );
            EventCounter::increment(kind, "rejected");
            return Ok(EventOutcome::Rejected(err.user_message().to_string()));
        }

        let mut settle_sale = None;
        match &event.payload {
            EventPayload::ArtifactPublished {
                origin,
                local_id,
                author,
                publish_time,
            } => {
                let publication = NewPublication {
                    artifact: ArtifactId::new(origin.clone(), *local_id),
                    author: author.clone(),
                    publish_time: *publish_time,
                    block_number: event.block_number,
                    placeholder: false,
                };
                if !Database::insert_publication(&mut tx, &publication).await? {
                    debug!(artifact = %publication.artifact, "Artifact already published");
                }
                if Database::clear_empty_resolution(&mut tx, &publication.artifact).await? {
                    debug!(
                        artifact = %publication.artifact,
                        "Empty resolution dropped; dependencies will be fetched again"
                    );
                }
            }
            EventPayload::SaleMade {
                origin,
                local_id,
                price,
                timestamp,
                buyer,
                seller,
            } => {
                let sale = NewSale {
                    id: event_id.to_string(),
                    artifact: ArtifactId::new(origin.clone(), *local_id),
                    price: price.clone(),
                    buyer: buyer.clone(),
                    seller: seller.clone(),
                    timestamp: *timestamp,
                    block_number: event.block_number,
                    synthetic_id: event_id.is_synthetic(),
                };
                if Database::insert_sale(&mut tx, &sale).await? {
                    settle_sale = Some(sale.id);
                }
            }
            EventPayload::RoyaltyParametersUpdated {
                initial_rate,
                decay_factor,
                decay_period,
            } => {
                Database::insert_parameters(
                    &mut tx,
                    &event_id,
                    *initial_rate,
                    *decay_factor,
                    *decay_period,
                    event.block_number,
                )
                .await?;
                info!(
                    initial_rate = initial_rate,
                    decay_factor = decay_factor,
                    decay_period = decay_period,
                    "Royalty parameters updated"
                );
            }
        }
        tx.commit().await?;
        EventCounter::increment(kind, "applied");
        debug!(event_id = %event_id, kind = kind, "Event applied");

        if let Some(sale_id) = settle_sale {
            if let Err(err) = self.ledger.settle(&sale_id).await {
                warn!(
                    sale_id = %sale_id,
                    error_code = %err.code(),
                    error = %err,
                    "Inline settlement failed; left for the sweep"
                );
            }
        }

        Ok(EventOutcome::Applied)
    }
}

fn validate(payload: &EventPayload) -> Result<()> {
    match payload {
        EventPayload::ArtifactPublished { origin, author, .. } => {
            if origin.is_empty() || author.is_empty() {
                return Err(CascadeError::invalid_event(
                    "publication needs an origin and an author",
                ));
            }
        }
        EventPayload::SaleMade { origin, seller, .. } => {
            if origin.is_empty() || seller.is_empty() {
                return Err(CascadeError::invalid_event("sale needs an origin and a seller"));
            }
        }
        EventPayload::RoyaltyParametersUpdated {
            initial_rate,
            decay_factor,
            decay_period,
        } => {
            RoyaltyParameters {
                initial_rate: *initial_rate,
                decay_factor: *decay_factor,
                decay_period: *decay_period,
            }
            .validate()?;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Consumer Loop
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters for the consumer loop.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub applied: Arc<AtomicU64>,
    pub duplicates: Arc<AtomicU64>,
    pub rejected: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
}

impl PipelineStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Handle for a running pipeline.
pub struct PipelineHandle {
    sender: EventSender,
    stats: PipelineStats,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Drop this handle's sender and wait for the consumer to drain and exit.
    ///
    /// The consumer exits once every sender is gone or the shutdown token
    /// fires, whichever comes first.
    pub async fn close(self) -> PipelineStats {
        drop(self.sender);
        if let Err(e) = self.task.await {
            error!(error = %e, "Event pipeline task failed");
        }
        self.stats
    }
}

/// Start the consumer loop.
pub fn spawn(processor: EventProcessor, capacity: usize, shutdown: CancellationToken) -> PipelineHandle {
    let (sender, mut receiver) = mpsc::channel::<InboundEvent>(capacity.max(1));
    let stats = PipelineStats::default();
    let loop_stats = stats.clone();

    let task = tokio::spawn(async move {
        info!(capacity = capacity, "Event pipeline started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Event pipeline shutting down");
                    break;
                }
                next = receiver.recv() => {
                    let Some(event) = next else { break };
                    match processor.process(&event).await {
                        Ok(EventOutcome::Applied) => {
                            loop_stats.applied.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(EventOutcome::Duplicate) => {
                            loop_stats.duplicates.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(EventOutcome::Rejected(_)) => {
                            loop_stats.rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            loop_stats.failed.fetch_add(1, Ordering::Relaxed);
                            EventCounter::increment(event.payload.kind(), "failed");
                            error!(
                                event_id = %event.event_id(),
                                error_code = %err.code(),
                                error = %err,
                                "Event processing failed"
                            );
                        }
                    }
                }
            }
        }

        info!(
            applied = loop_stats.applied(),
            duplicates = loop_stats.duplicates(),
            rejected = loop_stats.rejected(),
            failed = loop_stats.failed(),
            "Event pipeline stopped"
        );
    });

    PipelineHandle {
        sender,
        stats,
        task,
    }
}

/// Feed a JSON-lines file of events into the pipeline.
///
/// Blank lines and lines starting with `#` are skipped; malformed lines are
/// logged and skipped. Returns the number of events sent.
pub async fn replay_file(path: &Path, sender: &EventSender) -> Result<usize> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut sent = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed replay line");
                continue;
            }
        };
        if sender.send(event).await.is_err() {
            warn!(line = line_no, "Pipeline closed during replay");
            break;
        }
        sent += 1;
    }

    info!(path = %path.display(), events = sent, "Replay finished");
    Ok(sent)
}
