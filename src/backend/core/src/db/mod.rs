//! Fact store for Cascade.
//!
//! Uses SQLite through sqlx. Reads go through the pool; writes that must be
//! atomic with other writes take a `&mut SqliteConnection` borrowed from a
//! transaction (`&mut *tx`).

pub mod health;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{CascadeError, Result};
use crate::events::EventId;
use crate::types::{Amount, ArtifactId};

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// A private, migrated in-memory database.
    ///
    /// The pool holds exactly one connection that is never recycled, since
    /// every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. Dropping it without commit rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Processed Event Markers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Check whether an event id was already applied.
    pub async fn is_processed(conn: &mut SqliteConnection, event_id: &EventId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM processed_events WHERE id = ?")
            .bind(event_id.as_str())
            .fetch_optional(conn)
            .await?;
        Ok(found.is_some())
    }

    /// Record an event id. Returns false if it was already present.
    pub async fn mark_processed(conn: &mut SqliteConnection, event_id: &EventId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (id, synthetic, processed_at)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event_id.as_str())
        .bind(event_id.is_synthetic())
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Processed-event markers, newest first.
    pub async fn processed_events(&self, limit: i64) -> Result<Vec<ProcessedEventRow>> {
        let rows = sqlx::query_as::<_, ProcessedEventRow>(
            r#"
            SELECT id, synthetic, processed_at
            FROM processed_events
            ORDER BY processed_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Publication Operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Insert a publication. A real publication supersedes a placeholder;
    /// otherwise the first record wins. Returns true if a row was written.
    pub async fn insert_publication(
        conn: &mut SqliteConnection,
        publication: &NewPublication,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO publications
                (origin, local_id, author, publish_time, block_number, placeholder, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (origin, local_id) DO UPDATE SET
                author = excluded.author,
                publish_time = excluded.publish_time,
                block_number = excluded.block_number,
                placeholder = excluded.placeholder,
                recorded_at = excluded.recorded_at
            WHERE publications.placeholder = 1 AND excluded.placeholder = 0
            "#,
        )
        .bind(&publication.artifact.origin)
        .bind(publication.artifact.local_id_text())
        .bind(&publication.author)
        .bind(publication.publish_time)
        .bind(publication.block_number as i64)
        .bind(publication.placeholder)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a publication by artifact.
    pub async fn get_publication(&self, artifact: &ArtifactId) -> Result<Option<PublicationRow>> {
        let row = sqlx::query_as::<_, PublicationRow>(
            r#"
            SELECT origin, local_id, author, publish_time, block_number, placeholder, recorded_at
            FROM publications
            WHERE origin = ? AND local_id = ?
            "#,
        )
        .bind(&artifact.origin)
        .bind(artifact.local_id_text())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// All publications, newest first.
    pub async fn list_publications(&self) -> Result<Vec<PublicationRow>> {
        let rows = sqlx::query_as::<_, PublicationRow>(
            r#"
            SELECT origin, local_id, author, publish_time, block_number, placeholder, recorded_at
            FROM publications
            ORDER BY publish_time DESC, recorded_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Sale Operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Insert a sale. Returns false if the sale id already exists.
    pub async fn insert_sale(conn: &mut SqliteConnection, sale: &NewSale) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sales
                (id, origin, local_id, price, buyer, seller, timestamp, block_number,
                 synthetic_id, settled, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.artifact.origin)
        .bind(sale.artifact.local_id_text())
        .bind(sale.price.to_string())
        .bind(&sale.buyer)
        .bind(&sale.seller)
        .bind(sale.timestamp)
        .bind(sale.block_number as i64)
        .bind(sale.synthetic_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get sale by ID.
    pub async fn get_sale(&self, sale_id: &str) -> Result<Option<SaleRow>> {
        let row = sqlx::query_as::<_, SaleRow>(&format!("{} WHERE id = ?", SALE_COLUMNS))
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// All sales, newest first.
    pub async fn list_sales(&self) -> Result<Vec<SaleRow>> {
        let rows = sqlx::query_as::<_, SaleRow>(&format!(
            "{} ORDER BY timestamp DESC, recorded_at DESC",
            SALE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Sales that credited a beneficiary, newest first.
    pub async fn sales_for_beneficiary(&self, beneficiary: &str) -> Result<Vec<SaleRow>> {
        let rows = sqlx::query_as::<_, SaleRow>(&format!(
            r#"{}
            WHERE id IN (SELECT sale_id FROM royalty_allocations WHERE beneficiary = ?)
            ORDER BY timestamp DESC, recorded_at DESC"#,
            SALE_COLUMNS
        ))
        .bind(beneficiary)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Unsettled sales, oldest first.
    pub async fn unsettled_sales(&self, limit: i64) -> Result<Vec<SaleRow>> {
        let rows = sqlx::query_as::<_, SaleRow>(&format!(
            "{} WHERE settled = 0 ORDER BY timestamp ASC, recorded_at ASC LIMIT ?",
            SALE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Settled sales still waiting on the artifact source, oldest first.
    pub async fn partial_sales(&self, limit: i64) -> Result<Vec<SaleRow>> {
        let rows = sqlx::query_as::<_, SaleRow>(&format!(
            r#"{}
            WHERE settled = 1 AND awaiting_upstream = 1
            ORDER BY timestamp ASC, recorded_at ASC LIMIT ?"#,
            SALE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Take the write lock on a partially settled sale. Returns false once
    /// the sale is complete, so a completion that lost the race stops here.
    pub async fn lock_partial_sale(conn: &mut SqliteConnection, sale_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET settled_at = settled_at
            WHERE id = ? AND settled = 1 AND awaiting_upstream = 1
            "#,
        )
        .bind(sale_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record the new royalty total and closure state of a settled sale.
    pub async fn update_settlement(
        conn: &mut SqliteConnection,
        sale_id: &str,
        royalty_amount: &Amount,
        closure: SettlementState,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sales SET royalty_amount = ?, closure_complete = ?, awaiting_upstream = ?
            WHERE id = ? AND settled = 1
            "#,
        )
        .bind(royalty_amount.to_string())
        .bind(closure.closure_complete)
        .bind(closure.awaiting_upstream)
        .bind(sale_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Claim a sale for settlement. Only one caller ever sees `true`.
    ///
    /// This is the first write of the settlement transaction, so concurrent
    /// settlements serialize on the store's write lock here.
    pub async fn claim_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
        royalty_amount: &Amount,
        closure: SettlementState,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales
            SET settled = 1, royalty_amount = ?, closure_complete = ?, awaiting_upstream = ?,
                settled_at = ?
            WHERE id = ? AND settled = 0
            "#,
        )
        .bind(royalty_amount.to_string())
        .bind(closure.closure_complete)
        .bind(closure.awaiting_upstream)
        .bind(Utc::now())
        .bind(sale_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Dependency Edge Operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Upsert an edge, keeping the minimum depth.
    pub async fn upsert_edge(&self, from: &ArtifactId, to: &ArtifactId, depth: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dependency_edges
                (from_origin, from_local_id, to_origin, to_local_id, depth, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (from_origin, from_local_id, to_origin, to_local_id)
            DO UPDATE SET depth = MIN(dependency_edges.depth, excluded.depth)
            "#,
        )
        .bind(&from.origin)
        .bind(from.local_id_text())
        .bind(&to.origin)
        .bind(to.local_id_text())
        .bind(depth as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Project `child`'s stored closure onto `node` at `offset + depth`,
    /// keeping the minimum and never writing a self edge on `node`.
    pub async fn project_closure(
        &self,
        node: &ArtifactId,
        child: &ArtifactId,
        offset: u32,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO dependency_edges
                (from_origin, from_local_id, to_origin, to_local_id, depth, discovered_at)
            SELECT ?, ?, to_origin, to_local_id, depth + ?, ?
            FROM dependency_edges
            WHERE from_origin = ? AND from_local_id = ?
              AND NOT (to_origin = ? AND to_local_id = ?)
            ON CONFLICT (from_origin, from_local_id, to_origin, to_local_id)
            DO UPDATE SET depth = MIN(dependency_edges.depth, excluded.depth)
            "#,
        )
        .bind(&node.origin)
        .bind(node.local_id_text())
        .bind(offset as i64)
        .bind(Utc::now())
        .bind(&child.origin)
        .bind(child.local_id_text())
        .bind(&node.origin)
        .bind(node.local_id_text())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Immediate dependencies (depth-1 edges).
    pub async fn direct_dependencies(&self, artifact: &ArtifactId) -> Result<Vec<ArtifactId>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT to_origin, to_local_id
            FROM dependency_edges
            WHERE from_origin = ? AND from_local_id = ? AND depth = 1
            "#,
        )
        .bind(&artifact.origin)
        .bind(artifact.local_id_text())
        .fetch_all(&self.pool)
        .await?;

        let mut deps = rows
            .into_iter()
            .map(|(origin, local_id)| stored_artifact(origin, &local_id))
            .collect::<Result<Vec<_>>>()?;
        deps.sort();
        Ok(deps)
    }

    /// Stored closure of an artifact with authors, ascending depth, ties by
    /// origin then local id.
    pub async fn closure(&self, artifact: &ArtifactId) -> Result<Vec<ClosureEntry>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT e.to_origin AS origin, e.to_local_id AS local_id, e.depth, p.author
            FROM dependency_edges e
            LEFT JOIN publications p
                ON p.origin = e.to_origin AND p.local_id = e.to_local_id
            WHERE e.from_origin = ? AND e.from_local_id = ?
            "#,
        )
        .bind(&artifact.origin)
        .bind(artifact.local_id_text())
        .fetch_all(&self.pool)
        .await?;

        entries_from_rows(rows)
    }

    /// Artifacts whose closure contains `artifact`, ascending depth.
    pub async fn dependents(&self, artifact: &ArtifactId) -> Result<Vec<ClosureEntry>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT e.from_origin AS origin, e.from_local_id AS local_id, e.depth, p.author
            FROM dependency_edges e
            LEFT JOIN publications p
                ON p.origin = e.from_origin AND p.local_id = e.from_local_id
            WHERE e.to_origin = ? AND e.to_local_id = ?
            "#,
        )
        .bind(&artifact.origin)
        .bind(artifact.local_id_text())
        .fetch_all(&self.pool)
        .await?;

        entries_from_rows(rows)
    }

    /// Record that an artifact's immediate edges were fetched.
    pub async fn mark_resolved(&self, artifact: &ArtifactId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifact_resolutions (origin, local_id, resolved_at)
            VALUES (?, ?, ?)
            ON CONFLICT (origin, local_id) DO NOTHING
            "#,
        )
        .bind(&artifact.origin)
        .bind(artifact.local_id_text())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop the resolution marker of an artifact that has no stored edges, so
    /// the next traversal asks the source again. Returns true if one was dropped.
    pub async fn clear_empty_resolution(
        conn: &mut SqliteConnection,
        artifact: &ArtifactId,
    ) -> Result<bool> {
        let local_id = artifact.local_id_text();
        let result = sqlx::query(
            r#"
            DELETE FROM artifact_resolutions
            WHERE origin = ? AND local_id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM dependency_edges
                  WHERE from_origin = ? AND from_local_id = ?
              )
            "#,
        )
        .bind(&artifact.origin)
        .bind(&local_id)
        .bind(&artifact.origin)
        .bind(&local_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn is_resolved(&self, artifact: &ArtifactId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM artifact_resolutions WHERE origin = ? AND local_id = ?",
        )
        .bind(&artifact.origin)
        .bind(artifact.local_id_text())
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Royalty Parameter Operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Append a parameter set. Returns false if the event was already recorded.
    pub async fn insert_parameters(
        conn: &mut SqliteConnection,
        event_id: &EventId,
        initial_rate: u32,
        decay_factor: u32,
        decay_period: u64,
        block_number: u64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO royalty_parameters
                (event_id, initial_rate, decay_factor, decay_period, block_number, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id.as_str())
        .bind(initial_rate as i64)
        .bind(decay_factor as i64)
        .bind(decay_period as i64)
        .bind(block_number as i64)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// The most recent parameter set by block, then arrival.
    pub async fn latest_parameters(&self) -> Result<Option<ParametersRow>> {
        let row = sqlx::query_as::<_, ParametersRow>(
            r#"
            SELECT id, event_id, initial_rate, decay_factor, decay_period, block_number, recorded_at
            FROM royalty_parameters
            ORDER BY block_number DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Allocation & Balance Operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Write one allocation. Returns false if the same allocation exists.
    pub async fn insert_allocation(
        conn: &mut SqliteConnection,
        sale_id: &str,
        allocation: &NewAllocation,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO royalty_allocations
                (sale_id, beneficiary, origin, local_id, depth, amount, rate_bps)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (sale_id, beneficiary, origin, local_id, depth) DO NOTHING
            "#,
        )
        .bind(sale_id)
        .bind(&allocation.beneficiary)
        .bind(&allocation.artifact.origin)
        .bind(allocation.artifact.local_id_text())
        .bind(allocation.depth as i64)
        .bind(allocation.amount.to_string())
        .bind(allocation.rate_bps as i64)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Allocations of a sale in write order (ascending depth).
    pub async fn allocations_for_sale(&self, sale_id: &str) -> Result<Vec<AllocationRow>> {
        let mut conn = self.pool.acquire().await?;
        Self::sale_allocations(&mut conn, sale_id).await
    }

    /// [`allocations_for_sale`](Self::allocations_for_sale) inside a transaction.
    pub async fn sale_allocations(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> Result<Vec<AllocationRow>> {
        let rows = sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT a.id, a.sale_id, a.beneficiary, a.origin, a.local_id, a.depth,
                   a.amount, a.rate_bps
            FROM royalty_allocations a
            WHERE a.sale_id = ?
            ORDER BY a.depth ASC, a.id ASC
            "#,
        )
        .bind(sale_id)
        .fetch_all(conn)
        .await?;

        Ok(rows)
    }

    /// Add to a beneficiary's pending balance.
    pub async fn credit_balance(
        conn: &mut SqliteConnection,
        beneficiary: &str,
        amount: &Amount,
    ) -> Result<()> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT amount FROM pending_balances WHERE beneficiary = ?")
                .bind(beneficiary)
                .fetch_optional(&mut *conn)
                .await?;

        let current = match current {
            Some(text) => stored_amount(&text)?,
            None => Amount::zero(),
        };
        let updated = current + amount;

        sqlx::query(
            r#"
            INSERT INTO pending_balances (beneficiary, amount, last_updated)
            VALUES (?, ?, ?)
            ON CONFLICT (beneficiary) DO UPDATE SET
                amount = excluded.amount,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(beneficiary)
        .bind(updated.to_string())
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Pending balance, zero if the beneficiary was never credited.
    pub async fn pending_balance(&self, beneficiary: &str) -> Result<Amount> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT amount FROM pending_balances WHERE beneficiary = ?")
                .bind(beneficiary)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some(text) => stored_amount(&text),
            None => Ok(Amount::zero()),
        }
    }

    /// Move the whole non-zero balance into a withdrawal record and zero it.
    /// Returns `None` when there is nothing to take.
    pub async fn take_balance(
        conn: &mut SqliteConnection,
        beneficiary: &str,
    ) -> Result<Option<Amount>> {
        let now = Utc::now();
        let taken: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO withdrawals (beneficiary, amount, withdrawn_at)
            SELECT beneficiary, amount, ?
            FROM pending_balances
            WHERE beneficiary = ? AND amount <> '0'
            RETURNING amount
            "#,
        )
        .bind(now)
        .bind(beneficiary)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(taken) = taken else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE pending_balances SET amount = '0', last_updated = ? WHERE beneficiary = ?",
        )
        .bind(now)
        .bind(beneficiary)
        .execute(conn)
        .await?;

        stored_amount(&taken).map(Some)
    }

    /// Withdrawal history of a beneficiary, oldest first.
    pub async fn withdrawals(&self, beneficiary: &str) -> Result<Vec<WithdrawalRow>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            SELECT id, beneficiary, amount, withdrawn_at
            FROM withdrawals
            WHERE beneficiary = ?
            ORDER BY id ASC
            "#,
        )
        .bind(beneficiary)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

const SALE_COLUMNS: &str = r#"
    SELECT id, origin, local_id, price, buyer, seller, timestamp, block_number,
           synthetic_id, settled, royalty_amount, closure_complete, awaiting_upstream,
           settled_at, recorded_at
    FROM sales"#;

fn stored_artifact(origin: String, local_id: &str) -> Result<ArtifactId> {
    let local_id = local_id.parse::<u64>().map_err(|_| {
        CascadeError::internal(format!("corrupt local id in store: {:?}", local_id))
    })?;
    Ok(ArtifactId::new(origin, local_id))
}

pub(crate) fn stored_amount(text: &str) -> Result<Amount> {
    text.parse::<Amount>()
        .map_err(|_| CascadeError::internal(format!("corrupt amount in store: {:?}", text)))
}

fn entries_from_rows(rows: Vec<EdgeRow>) -> Result<Vec<ClosureEntry>> {
    let mut entries = rows
        .into_iter()
        .map(|row| {
            Ok(ClosureEntry {
                artifact: stored_artifact(row.origin, &row.local_id)?,
                depth: row.depth as u32,
                author: row.author,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    entries.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.artifact.cmp(&b.artifact)));
    Ok(entries)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types (for sqlx queries)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PublicationRow {
    pub origin: String,
    pub local_id: String,
    pub author: String,
    pub publish_time: i64,
    pub block_number: i64,
    pub placeholder: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SaleRow {
    pub id: String,
    pub origin: String,
    pub local_id: String,
    pub price: String,
    pub buyer: String,
    pub seller: String,
    pub timestamp: i64,
    pub block_number: i64,
    pub synthetic_id: bool,
    pub settled: bool,
    pub royalty_amount: Option<String>,
    pub closure_complete: Option<bool>,
    /// Settled while the artifact source was failing; the sweep re-attempts it.
    pub awaiting_upstream: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

impl SaleRow {
    pub fn artifact(&self) -> Result<ArtifactId> {
        stored_artifact(self.origin.clone(), &self.local_id)
    }

    pub fn price(&self) -> Result<Amount> {
        stored_amount(&self.price)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EdgeRow {
    origin: String,
    local_id: String,
    depth: i64,
    author: Option<String>,
}

/// One member of a closure (or of a reverse closure).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ClosureEntry {
    #[serde(flatten)]
    pub artifact: ArtifactId,
    pub depth: u32,
    pub author: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct AllocationRow {
    pub id: i64,
    pub sale_id: String,
    pub beneficiary: String,
    pub origin: String,
    pub local_id: String,
    pub depth: i64,
    pub amount: String,
    pub rate_bps: i64,
}

impl AllocationRow {
    pub fn artifact(&self) -> Result<ArtifactId> {
        stored_artifact(self.origin.clone(), &self.local_id)
    }

    pub fn amount(&self) -> Result<Amount> {
        stored_amount(&self.amount)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ParametersRow {
    pub id: i64,
    pub event_id: String,
    pub initial_rate: i64,
    pub decay_factor: i64,
    pub decay_period: i64,
    pub block_number: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ProcessedEventRow {
    pub id: String,
    pub synthetic: bool,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct WithdrawalRow {
    pub id: i64,
    pub beneficiary: String,
    pub amount: String,
    pub withdrawn_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Write Models
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct NewPublication {
    pub artifact: ArtifactId,
    pub author: String,
    pub publish_time: i64,
    pub block_number: u64,
    pub placeholder: bool,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub id: String,
    pub artifact: ArtifactId,
    pub price: Amount,
    pub buyer: String,
    pub seller: String,
    pub timestamp: i64,
    pub block_number: u64,
    pub synthetic_id: bool,
}

/// Closure state recorded with a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementState {
    pub closure_complete: bool,
    pub awaiting_upstream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NewAllocation {
    pub beneficiary: String,
    pub artifact: ArtifactId,
    pub depth: u32,
    pub amount: Amount,
    pub rate_bps: u32,
}
