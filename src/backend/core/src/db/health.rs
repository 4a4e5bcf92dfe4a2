//! Store connectivity and pool status for the health endpoint.

use std::time::{Duration, Instant};
use tracing::{error, warn};

use super::Database;
use crate::error::Result;

/// Snapshot of the connection pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionPoolMetrics {
    /// Total connections in the pool.
    pub pool_size: u32,
    /// Number of idle connections.
    pub idle_connections: u32,
    /// Number of active (in-use) connections.
    pub active_connections: u32,
}

/// Result of a health probe against the store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreHealth {
    pub connected: bool,
    pub latency_ms: u64,
    pub pool: ConnectionPoolMetrics,
}

impl Database {
    /// Check database connectivity by executing a simple query.
    pub async fn check_connectivity(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.pool())
            .await
            .map_err(|e| {
                error!(error = %e, "Database connectivity check failed");
                crate::error::CascadeError::from(e)
            })?;
        let latency = start.elapsed();
        if latency > Duration::from_millis(100) {
            warn!(
                latency_ms = latency.as_millis() as u64,
                "Database connectivity check latency is high"
            );
        }
        Ok(latency)
    }

    /// Get connection pool metrics.
    pub fn pool_metrics(&self) -> ConnectionPoolMetrics {
        let pool_size = self.pool().size();
        let idle = self.pool().num_idle() as u32;
        ConnectionPoolMetrics {
            pool_size,
            idle_connections: idle,
            active_connections: pool_size.saturating_sub(idle),
        }
    }

    /// Probe the store; never fails, a failed probe reports `connected: false`.
    pub async fn health(&self) -> StoreHealth {
        let (connected, latency_ms) = match self.check_connectivity().await {
            Ok(latency) => (true, latency.as_millis() as u64),
            Err(_) => (false, 0),
        };
        StoreHealth {
            connected,
            latency_ms,
            pool: self.pool_metrics(),
        }
    }
}
