//! Inbound event definitions and stable event identifiers.
//!
//! This module provides:
//! - `EventId`: the origin-derived id (`<tx_hash>-<log_index>`) or a
//!   deterministic synthesized fallback
//! - `InboundEvent`: a normalized event record fed to the pipeline
//! - `EventPayload`: the three event kinds the indexer understands

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::{Amount, ArtifactId};

// =============================================================================
// Event IDs
// =============================================================================

/// Prefix reserved for synthesized ids. Origin ids never carry it.
pub const SYNTHETIC_PREFIX: &str = "synthetic:";

/// Stable identifier of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Id derived from the originating transaction and log position.
    pub fn from_origin(tx_hash: &str, log_index: u64) -> Self {
        Self(format!("{}-{}", tx_hash, log_index))
    }

    /// Fallback id: a hash of the canonical payload and block number, so the
    /// same logical event always yields the same id.
    pub fn synthesize(payload: &EventPayload, block_number: u64) -> Self {
        let mut hasher = Sha256::new();
        // Field order is fixed by the type definition, so the encoding is canonical.
        hasher.update(serde_json::to_vec(payload).unwrap_or_default());
        hasher.update(block_number.to_be_bytes());
        Self(format!("{}{}", SYNTHETIC_PREFIX, hex::encode(hasher.finalize())))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(SYNTHETIC_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Inbound Events
// =============================================================================

/// A normalized event from the originating ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub block_number: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,

    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Event kinds, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ArtifactPublished {
        origin: String,
        local_id: u64,
        author: String,
        publish_time: i64,
    },
    SaleMade {
        origin: String,
        local_id: u64,
        price: Amount,
        timestamp: i64,
        buyer: String,
        seller: String,
    },
    RoyaltyParametersUpdated {
        initial_rate: u32,
        decay_factor: u32,
        decay_period: u64,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ArtifactPublished { .. } => "artifact_published",
            Self::SaleMade { .. } => "sale_made",
            Self::RoyaltyParametersUpdated { .. } => "royalty_parameters_updated",
        }
    }

    /// The artifact this event is about, if any.
    pub fn artifact(&self) -> Option<ArtifactId> {
        match self {
            Self::ArtifactPublished { origin, local_id, .. }
            | Self::SaleMade { origin, local_id, .. } => {
                Some(ArtifactId::new(origin.clone(), *local_id))
            }
            Self::RoyaltyParametersUpdated { .. } => None,
        }
    }
}

impl InboundEvent {
    pub fn new(block_number: u64, payload: EventPayload) -> Self {
        Self {
            block_number,
            tx_hash: None,
            log_index: None,
            payload,
        }
    }

    pub fn with_origin(mut self, tx_hash: impl Into<String>, log_index: u64) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self.log_index = Some(log_index);
        self
    }

    /// The stable id for this event. The origin id is preferred; an origin id
    /// that is empty or collides with the synthetic namespace is not trusted.
    pub fn event_id(&self) -> EventId {
        match (&self.tx_hash, self.log_index) {
            (Some(tx_hash), Some(log_index))
                if !tx_hash.is_empty() && !tx_hash.starts_with(SYNTHETIC_PREFIX) =>
            {
                EventId::from_origin(tx_hash, log_index)
            }
            _ => EventId::synthesize(&self.payload, self.block_number),
        }
    }
}
