//! Event intake.
//!
//! - **`event`**: inbound event records and stable event ids
//! - **`dedup`**: the processed-event gate
//! - **`pipeline`**: channel-fed single consumer applying events in arrival order

pub mod dedup;
pub mod event;
pub mod pipeline;

pub use dedup::EventDeduplicator;
pub use event::{EventId, EventPayload, InboundEvent, SYNTHETIC_PREFIX};
pub use pipeline::{EventOutcome, EventProcessor, EventSender, PipelineHandle, PipelineStats};
