//! Three-phase time synchronization (§4.5): delay measurement, mesh-time
//! offset computation, and the per-connection scheduling decisions that
//! decide when a node re-syncs with its station.
//!
//! Like `mesh-routing`, this crate stays synchronous and clock-free of its
//! own accord — every function takes the relevant timestamps as arguments,
//! so the offset-convergence property (P5) can be driven by a virtual clock
//! in tests instead of real wall time.

mod config;
mod error;
mod manager;
mod sync;

pub use config::{TimeSyncConfig, DEFAULT_INTERVAL_MS, DEFAULT_JITTER_FRACTION};
pub use error::TimeSyncError;
pub use manager::{reply_message, request_message, TimeSyncAction, TimeSyncManager};
pub use sync::{handle_request_as_parent, TimeSyncOutcome, TimeSyncSchedule};
