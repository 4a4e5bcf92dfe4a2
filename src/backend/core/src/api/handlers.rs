//! Query handlers.
//!
//! All handlers return `Result<impl IntoResponse, CascadeError>` so that
//! errors become JSON bodies with the code's HTTP status.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use super::AppState;
use crate::db::{AllocationRow, ClosureEntry, SaleRow, WithdrawalRow};
use crate::error::{CascadeError, ErrorCode};
use crate::royalty::{bps_to_percent, RoyaltyParameters};
use crate::types::{Amount, ArtifactId};

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.db.health().await;
    let status = if store.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if store.connected { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "store": store,
        })),
    )
}

pub async fn prometheus_metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CascadeError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| CascadeError::not_found("route", "/metrics"))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    ))
}

pub async fn not_found(uri: Uri) -> CascadeError {
    CascadeError::new(
        ErrorCode::RecordNotFound,
        format!("No route for {}", uri.path()),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Balances & Sales
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct BeneficiaryRoyalties {
    pub beneficiary: String,
    pub pending: Amount,
    /// Sales that credited this beneficiary, newest first.
    pub sales: Vec<SaleRow>,
    pub withdrawals: Vec<WithdrawalRow>,
}

pub async fn royalties(
    State(state): State<AppState>,
    Path(beneficiary): Path<String>,
) -> Result<impl IntoResponse, CascadeError> {
    if beneficiary.trim().is_empty() {
        return Err(CascadeError::invalid_input("beneficiary must not be empty"));
    }

    let pending = state.ledger.pending_balance(&beneficiary).await?;
    let sales = state.db.sales_for_beneficiary(&beneficiary).await?;
    let withdrawals = state.db.withdrawals(&beneficiary).await?;

    Ok(Json(BeneficiaryRoyalties {
        beneficiary,
        pending,
        sales,
        withdrawals,
    }))
}

pub async fn list_sales(State(state): State<AppState>) -> Result<impl IntoResponse, CascadeError> {
    Ok(Json(state.db.list_sales().await?))
}

pub async fn list_publications(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CascadeError> {
    Ok(Json(state.db.list_publications().await?))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct ParametersResponse {
    #[serde(flatten)]
    pub parameters: RoyaltyParameters,
    /// Block of the recording event; absent for defaults.
    pub block_number: Option<i64>,
    pub is_default: bool,
}

pub async fn parameters(State(state): State<AppState>) -> Result<impl IntoResponse, CascadeError> {
    let response = match state.db.latest_parameters().await? {
        Some(row) => ParametersResponse {
            parameters: RoyaltyParameters::try_from(&row)?,
            block_number: Some(row.block_number),
            is_default: false,
        },
        None => ParametersResponse {
            parameters: RoyaltyParameters::default(),
            block_number: None,
            is_default: true,
        },
    };
    Ok(Json(response))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Graph
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct DependenciesResponse {
    pub origin: String,
    pub local_id: u64,
    pub dependencies: Vec<ClosureEntry>,
}

pub async fn dependencies(
    State(state): State<AppState>,
    Path((origin, local_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, CascadeError> {
    let artifact = ArtifactId::parse(origin, &local_id)?;
    let dependencies = state.resolver.closure(&artifact).await?;

    Ok(Json(DependenciesResponse {
        origin: artifact.origin,
        local_id: artifact.local_id,
        dependencies,
    }))
}

pub async fn graph(
    State(state): State<AppState>,
    Path((origin, local_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, CascadeError> {
    let artifact = ArtifactId::parse(origin, &local_id)?;
    Ok(Json(state.resolver.graph_view(&artifact).await?))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Royalty Tree
// ═══════════════════════════════════════════════════════════════════════════════

/// One allocation of a sale.
#[derive(Debug, Serialize)]
pub struct AllocationView {
    pub beneficiary: String,
    pub origin: String,
    pub local_id: String,
    pub depth: i64,
    pub amount: String,
    pub rate_bps: i64,
    /// Rate as a percentage string, e.g. `"6.5"`.
    pub rate_percent: String,
}

impl From<AllocationRow> for AllocationView {
    fn from(row: AllocationRow) -> Self {
        let rate_percent = bps_to_percent(u32::try_from(row.rate_bps).unwrap_or(0));
        Self {
            beneficiary: row.beneficiary,
            origin: row.origin,
            local_id: row.local_id,
            depth: row.depth,
            amount: row.amount,
            rate_bps: row.rate_bps,
            rate_percent,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoyaltyTreeResponse {
    pub sale_id: String,
    pub settled: bool,
    pub royalty_amount: Option<String>,
    /// Primary author first, then ascending depth.
    pub royalty_distribution: Vec<AllocationView>,
}

pub async fn royalty_tree(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
) -> Result<impl IntoResponse, CascadeError> {
    let sale = state
        .db
        .get_sale(&sale_id)
        .await?
        .ok_or_else(|| CascadeError::not_found("sale", &sale_id))?;

    let royalty_distribution = state
        .db
        .allocations_for_sale(&sale.id)
        .await?
        .into_iter()
        .map(AllocationView::from)
        .collect();

    Ok(Json(RoyaltyTreeResponse {
        sale_id: sale.id,
        settled: sale.settled,
        royalty_amount: sale.royalty_amount,
        royalty_distribution,
    }))
}
