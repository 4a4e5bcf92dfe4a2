#![allow(clippy::result_large_err)]
//! # Cascade Core
//!
//! Dependency-weighted royalty indexer. Publications and sales arrive as
//! events; every sale pays the sold artifact's author and, at decaying
//! rates, the authors of everything it transitively depends on.
//!
//! ## Architecture
//!
//! - **Events**: deduplicated, single-consumer pipeline fed by a channel
//! - **Store**: SQLite facts, dependency edges, allocations and balances
//! - **Graph**: depth-minimizing closure resolution against an artifact source
//! - **Royalty**: basis-point rate schedule with per-level truncation
//! - **Ledger**: at-most-once sale settlement and all-or-nothing withdrawals
//! - **Jobs**: cancellable maintenance sweep for unsettled sales
//! - **API**: read-only HTTP/JSON projections
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod graph;
pub mod jobs;
pub mod ledger;
pub mod royalty;
pub mod telemetry;
pub mod types;

pub use error::{CascadeError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::config::Config;
    pub use crate::db::Database;
    pub use crate::error::{CascadeError, ErrorCode, Result};
    pub use crate::events::{EventOutcome, EventPayload, EventProcessor, InboundEvent};
    pub use crate::graph::{ArtifactSource, DependencyResolver, StaticArtifactSource};
    pub use crate::jobs::{spawn_sweep, IntervalSchedule, MaintenanceSweep};
    pub use crate::ledger::{RoyaltyLedger, SettlementResult};
    pub use crate::royalty::{RoyaltyCalculator, RoyaltyParameters};
    pub use crate::types::{Amount, ArtifactId};
}
