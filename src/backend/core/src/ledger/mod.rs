//! Royalty ledger: sale settlement and withdrawals.
//!
//! Settlement resolves the sold artifact's closure outside any transaction
//! (it may call the artifact source), then commits in one transaction:
//! claim the sale, write allocations primary author first and then by
//! ascending depth, credit pending balances. The claim is a conditional
//! update on `settled = 0`, so of any number of concurrent settlements for
//! one sale exactly one commits.
//!
//! A sale settled while the artifact source was unreachable keeps
//! `closure_complete = 0`. [`RoyaltyLedger::complete_partial`] re-resolves
//! its closure later and pays only the allocations it is still missing, out
//! of whatever part of the price the first settlement left.

use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::db::{Database, NewAllocation, NewPublication, SaleRow};
use crate::error::{CascadeError, Result};
use crate::graph::{ClosureReport, DependencyResolver};
use crate::royalty::{cap_to_price, RoyaltyCalculator, RoyaltyParameters};
use crate::telemetry::SettlementMetrics;
use crate::types::{Amount, ArtifactId};

/// Result of a settlement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementResult {
    Settled(SettlementSummary),
    /// A partially settled sale received its missing allocations.
    Supplemented(SettlementSummary),
    /// The sale was settled before; nothing changed.
    AlreadySettled,
}

impl SettlementResult {
    pub fn is_settled_now(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    pub sale_id: String,
    /// Royalty total of the sale after this settlement.
    pub total: Amount,
    /// Allocations written by this settlement.
    pub allocations: Vec<NewAllocation>,
    /// False when part of the closure could not be resolved.
    pub closure_complete: bool,
}

/// Settles sales and pays out balances.
#[derive(Clone)]
pub struct RoyaltyLedger {
    db: Database,
    resolver: DependencyResolver,
    calculator: RoyaltyCalculator,
}

impl RoyaltyLedger {
    pub fn new(db: Database, resolver: DependencyResolver, calculator: RoyaltyCalculator) -> Self {
        Self {
            db,
            resolver,
            calculator,
        }
    }

    pub fn calculator(&self) -> &RoyaltyCalculator {
        &self.calculator
    }

    /// Latest recorded parameter set, or the defaults.
    pub async fn current_parameters(&self) -> Result<RoyaltyParameters> {
        match self.db.latest_parameters().await? {
            Some(row) => RoyaltyParameters::try_from(&row),
            None => Ok(RoyaltyParameters::default()),
        }
    }

    /// Settle a sale at most once.
    #[instrument(skip(self))]
    pub async fn settle(&self, sale_id: &str) -> Result<SettlementResult> {
        let started = Instant::now();

        let sale = self
            .db
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| CascadeError::not_found("sale", sale_id))?;
        if sale.settled {
            debug!(
                sale_id = sale_id,
                error_code = %CascadeError::already_settled(sale_id).code(),
                "Settlement skipped"
            );
            return Ok(SettlementResult::AlreadySettled);
        }

        let artifact = sale.artifact()?;
        let price = sale.price()?;
        let report = self.resolver.resolve_dependencies(&artifact).await?;
        let params = self.current_parameters().await?;

        let mut placeholders = Vec::new();
        let mut allocations = Vec::new();

        let author = self.primary_author(&sale, &artifact, &mut placeholders).await?;
        if let Some((amount, rate_bps)) = self.calculator.allocate(&price, 0, &params) {
            allocations.push(NewAllocation {
                beneficiary: author,
                artifact: artifact.clone(),
                depth: 0,
                amount,
                rate_bps,
            });
        }
        self.dependency_allocations(
            sale_id,
            &price,
            &report,
            &params,
            &HashSet::new(),
            &mut placeholders,
            &mut allocations,
        )
        .await;

        let mut amounts: Vec<Amount> = allocations.iter().map(|a| a.amount.clone()).collect();
        cap_to_price(&price, &mut amounts);
        for (allocation, capped) in allocations.iter_mut().zip(amounts) {
            allocation.amount = capped;
        }
        let total: Amount = allocations.iter().map(|a| &a.amount).sum();
        let state = report.settlement_state();
        let closure_complete = state.closure_complete;

        let mut tx = self.db.begin().await?;
        if !Database::claim_sale(&mut tx, sale_id, &total, state).await? {
            tx.rollback().await?;
            debug!(
                sale_id = sale_id,
                error_code = %CascadeError::already_settled(sale_id).code(),
                "Sale claimed concurrently"
            );
            return Ok(SettlementResult::AlreadySettled);
        }
        for publication in &placeholders {
            Database::insert_publication(&mut tx, publication).await?;
        }
        for allocation in &allocations {
            if Database::insert_allocation(&mut tx, sale_id, allocation).await?
                && !allocation.amount.is_zero()
            {
                Database::credit_balance(&mut tx, &allocation.beneficiary, &allocation.amount)
                    .await?;
            }
        }
        tx.commit().await?;

        SettlementMetrics::record_settled(started.elapsed().as_secs_f64(), allocations.len());
        if closure_complete {
            info!(
                sale_id = sale_id,
                artifact = %artifact,
                total = %total,
                allocations = allocations.len(),
                "Sale settled"
            );
        } else {
            warn!(
                sale_id = sale_id,
                artifact = %artifact,
                total = %total,
                allocations = allocations.len(),
                upstream_failures = report.upstream_failures.len(),
                truncated = report.truncated,
                "Sale settled on a partial closure"
            );
        }

        Ok(SettlementResult::Settled(SettlementSummary {
            sale_id: sale_id.to_string(),
            total,
            allocations,
            closure_complete,
        }))
    }

    /// Pay the allocations a partially settled sale is still missing.
    ///
    /// The closure is resolved again; every dependency that has no allocation
    /// on this sale yet is allocated at the current parameters and capped to
    /// the part of the price not already paid out. An unsettled sale is
    /// settled normally; a complete one is left alone.
    #[instrument(skip(self))]
    pub async fn complete_partial(&self, sale_id: &str) -> Result<SettlementResult> {
        let sale = self
            .db
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| CascadeError::not_found("sale", sale_id))?;
        if !sale.settled {
            return self.settle(sale_id).await;
        }
        if !sale.awaiting_upstream {
            return Ok(SettlementResult::AlreadySettled);
        }

        let artifact = sale.artifact()?;
        let price = sale.price()?;
        let report = self.resolver.resolve_dependencies(&artifact).await?;
        let params = self.current_parameters().await?;

        let paid: HashSet<ArtifactId> = self
            .db
            .allocations_for_sale(sale_id)
            .await?
            .iter()
            .map(|row| row.artifact())
            .collect::<Result<_>>()?;

        let mut placeholders = Vec::new();
        let mut allocations = Vec::new();
        self.dependency_allocations(
            sale_id,
            &price,
            &report,
            &params,
            &paid,
            &mut placeholders,
            &mut allocations,
        )
        .await;
        let state = report.settlement_state();

        let mut tx = self.db.begin().await?;
        if !Database::lock_partial_sale(&mut tx, sale_id).await? {
            tx.rollback().await?;
            return Ok(SettlementResult::AlreadySettled);
        }

        // Re-read under the lock: a concurrent completion may have paid some
        // of these artifacts already.
        let existing = Database::sale_allocations(&mut tx, sale_id).await?;
        let mut already_paid = Amount::zero();
        let mut paid = HashSet::with_capacity(existing.len());
        for row in &existing {
            already_paid += &row.amount()?;
            paid.insert(row.artifact()?);
        }
        allocations.retain(|allocation| !paid.contains(&allocation.artifact));

        let mut amounts: Vec<Amount> = allocations.iter().map(|a| a.amount.clone()).collect();
        cap_to_price(&price.saturating_sub(&already_paid), &mut amounts);
        for (allocation, capped) in allocations.iter_mut().zip(amounts) {
            allocation.amount = capped;
        }

        for publication in &placeholders {
            Database::insert_publication(&mut tx, publication).await?;
        }
        let mut written = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            if !Database::insert_allocation(&mut tx, sale_id, &allocation).await? {
                continue;
            }
            if !allocation.amount.is_zero() {
                Database::credit_balance(&mut tx, &allocation.beneficiary, &allocation.amount)
                    .await?;
            }
            written.push(allocation);
        }
        let total = written.iter().map(|a| &a.amount).sum::<Amount>() + &already_paid;
        Database::update_settlement(&mut tx, sale_id, &total, state).await?;
        tx.commit().await?;

        info!(
            sale_id = sale_id,
            artifact = %artifact,
            total = %total,
            added = written.len(),
            closure_complete = state.closure_complete,
            "Partial settlement supplemented"
        );

        Ok(SettlementResult::Supplemented(SettlementSummary {
            sale_id: sale_id.to_string(),
            total,
            allocations: written,
            closure_complete: state.closure_complete,
        }))
    }

    /// Uncapped allocations for every closure member not in `skip`, ascending
    /// depth. Dependencies with no known author are left out.
    #[allow(clippy::too_many_arguments)]
    async fn dependency_allocations(
        &self,
        sale_id: &str,
        price: &Amount,
        report: &ClosureReport,
        params: &RoyaltyParameters,
        skip: &HashSet<ArtifactId>,
        placeholders: &mut Vec<NewPublication>,
        allocations: &mut Vec<NewAllocation>,
    ) {
        for entry in &report.dependencies {
            if skip.contains(&entry.artifact) {
                continue;
            }
            let Some((amount, rate_bps)) = self.calculator.allocate(price, entry.depth, params)
            else {
                continue;
            };
            let beneficiary = match &entry.author {
                Some(author) => author.clone(),
                None => match self.dependency_author(&entry.artifact, placeholders).await {
                    Some(author) => author,
                    None => {
                        warn!(
                            sale_id = sale_id,
                            artifact = %entry.artifact,
                            depth = entry.depth,
                            "No author known for dependency; allocation skipped"
                        );
                        continue;
                    }
                },
            };
            allocations.push(NewAllocation {
                beneficiary,
                artifact: entry.artifact.clone(),
                depth: entry.depth,
                amount,
                rate_bps,
            });
        }
    }

    /// Author of the sold artifact. An unpublished artifact gets a placeholder
    /// publication crediting the seller.
    async fn primary_author(
        &self,
        sale: &SaleRow,
        artifact: &ArtifactId,
        placeholders: &mut Vec<NewPublication>,
    ) -> Result<String> {
        if let Some(publication) = self.db.get_publication(artifact).await? {
            return Ok(publication.author);
        }

        let missing = CascadeError::missing_publication(artifact.to_string());
        warn!(
            sale_id = %sale.id,
            artifact = %artifact,
            error_code = %missing.code(),
            seller = %sale.seller,
            "Sale references an unpublished artifact; recording placeholder"
        );
        placeholders.push(NewPublication {
            artifact: artifact.clone(),
            author: sale.seller.clone(),
            publish_time: sale.timestamp,
            block_number: u64::try_from(sale.block_number).unwrap_or_default(),
            placeholder: true,
        });
        Ok(sale.seller.clone())
    }

    /// Author of a dependency that has no publication record, asked of the
    /// artifact source and recorded as a placeholder.
    async fn dependency_author(
        &self,
        artifact: &ArtifactId,
        placeholders: &mut Vec<NewPublication>,
    ) -> Option<String> {
        let source = self.resolver.source().clone();
        let lookup = self
            .resolver
            .retry_policy()
            .run("author_of", || {
                let source = source.clone();
                let artifact = artifact.clone();
                async move { source.author_of(&artifact).await }
            })
            .await;

        match lookup {
            Ok(Some(author)) => {
                placeholders.push(NewPublication {
                    artifact: artifact.clone(),
                    author: author.clone(),
                    publish_time: 0,
                    block_number: 0,
                    placeholder: true,
                });
                Some(author)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(
                    artifact = %artifact,
                    error_code = %err.code(),
                    error = %err,
                    "Author lookup failed"
                );
                SettlementMetrics::record_upstream_failure();
                None
            }
        }
    }

    /// Pay out a beneficiary's whole pending balance.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, beneficiary: &str) -> Result<Amount> {
        let mut tx = self.db.begin().await?;
        let Some(amount) = Database::take_balance(&mut tx, beneficiary).await? else {
            tx.rollback().await?;
            return Err(CascadeError::nothing_to_withdraw(beneficiary));
        };
        tx.commit().await?;

        info!(beneficiary = beneficiary, amount = %amount, "Balance withdrawn");
        Ok(amount)
    }

    pub async fn pending_balance(&self, beneficiary: &str) -> Result<Amount> {
        self.db.pending_balance(beneficiary).await
    }
}
