//! Time sync error taxonomy (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("no station connection available to sync time against")]
    NoStationConnection,

    #[error("TIME_SYNC reply t0={received} does not match the outstanding request t0={expected}")]
    UnexpectedT0 { expected: u32, received: u32 },

    #[error("expected a TIME_SYNC reply, got a request")]
    WrongPhase,
}
