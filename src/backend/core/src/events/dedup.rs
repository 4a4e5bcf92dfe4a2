//! Processed-event gate.
//!
//! An event is applied at most once: the marker insert and the mutation it
//! guards share one transaction, and the marker insert is the first write so
//! a duplicate is detected before anything else is touched.

use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::events::EventId;

/// Gate for externally sourced events.
#[derive(Clone)]
pub struct EventDeduplicator {
    db: Database,
}

impl EventDeduplicator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Whether the event was already applied.
    pub async fn is_processed(&self, event_id: &EventId) -> Result<bool> {
        let mut conn = self.db.pool().acquire().await?;
        Database::is_processed(&mut conn, event_id).await
    }

    /// Mark the event inside the caller's transaction.
    ///
    /// Returns false when the event was already applied; the caller must then
    /// roll back instead of applying the mutation.
    pub async fn mark_processed(
        &self,
        conn: &mut SqliteConnection,
        event_id: &EventId,
    ) -> Result<bool> {
        let fresh = Database::mark_processed(conn, event_id).await?;
        if !fresh {
            debug!(event_id = %event_id, "Duplicate event skipped");
        }
        Ok(fresh)
    }
}
