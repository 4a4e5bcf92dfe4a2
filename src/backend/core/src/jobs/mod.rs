//! Background jobs.
//!
//! - **Sweep**: settles sales left unsettled by the pipeline (upstream
//!   outage, storage hiccup, crash between recording and settling)
//! - **Scheduler**: runs the sweep on an interval and on demand, stopping on a
//!   cancellation token
//!
//! # Usage
//!
//! ```rust,ignore
//! use cascade_core::jobs::{spawn_sweep, IntervalSchedule, MaintenanceSweep};
//!
//! let sweep = MaintenanceSweep::new(db, ledger, 500);
//! let handle = spawn_sweep(sweep, IntervalSchedule::new(Duration::from_secs(60)), token.child_token());
//! handle.trigger();
//! handle.shutdown().await;
//! ```

pub mod scheduler;
pub mod sweep;

pub use scheduler::{spawn_sweep, IntervalSchedule, SweepHandle};
pub use sweep::{MaintenanceSweep, SweepReport};
