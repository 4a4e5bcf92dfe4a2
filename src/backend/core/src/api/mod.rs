//! Read-only HTTP query API.
//!
//! | Path | Body |
//! |---|---|
//! | `/royalties/{beneficiary}` | pending balance, sales, withdrawals |
//! | `/sales` | all sales, newest first |
//! | `/publications` | all artifacts, newest first |
//! | `/parameters` | latest royalty parameters, defaults if none |
//! | `/dependencies/{origin}/{local_id}` | stored closure, ascending depth |
//! | `/graph/{origin}/{local_id}` | dependencies and dependents |
//! | `/royaltytree/{sale_id}` | allocation breakdown, ascending depth |
//! | `/health` | liveness and store connectivity |
//! | `/metrics` | Prometheus exposition, when a recorder is installed |
//!
//! No handler triggers resolution or settlement. Errors are JSON bodies from
//! [`CascadeError`](crate::error::CascadeError); 5xx bodies carry a generic
//! message only.

mod handlers;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db::Database;
use crate::graph::DependencyResolver;
use crate::ledger::RoyaltyLedger;

pub use handlers::{
    AllocationView, BeneficiaryRoyalties, DependenciesResponse, ParametersResponse,
    RoyaltyTreeResponse,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub ledger: RoyaltyLedger,
    pub resolver: DependencyResolver,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(db: Database, ledger: RoyaltyLedger, resolver: DependencyResolver) -> Self {
        Self {
            db,
            ledger,
            resolver,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the query router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(db, ledger, resolver).with_metrics(handle);
/// let app = build_router(state);
/// axum::serve(listener, app).await?;
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/royalties/:beneficiary", get(handlers::royalties))
        .route("/sales", get(handlers::list_sales))
        .route("/publications", get(handlers::list_publications))
        .route("/parameters", get(handlers::parameters))
        .route(
            "/dependencies/:origin/:local_id",
            get(handlers::dependencies),
        )
        .route("/graph/:origin/:local_id", get(handlers::graph))
        .route("/royaltytree/:sale_id", get(handlers::royalty_tree))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
