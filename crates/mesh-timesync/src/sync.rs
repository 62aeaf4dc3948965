//! Per-connection time sync state machine (§4.5).
//!
//! Mirrors the shape of `mesh-connection`'s `Connection`: a pure value that
//! turns a clock reading or an incoming [`TimeSyncBody`] into the next wire
//! message or a computed offset, with no tokio and no wall-clock reads of
//! its own. Scheduling ("is it time to run again") is expressed in terms of
//! caller-supplied `now_micros`, so the façade's `tokio::time::interval` loop
//! is the only thing that ever touches a real clock.

use mesh_core::{TimeSyncBody, TimeSyncPhase};
use rand::Rng;
use tracing::{debug, trace};

use crate::config::TimeSyncConfig;
use crate::error::TimeSyncError;

/// Result of a completed three-phase exchange, from the child's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncOutcome {
    /// Offset to apply wholesale to this node's `MeshClock` (§4.5 step 3).
    pub offset_micros: i64,
    /// One-way delay estimate, stored on the Connection for diagnostics.
    pub delay_micros: u32,
}

/// Treat `a` and `b` as 32-bit wrapping mesh timestamps and return `b - a`
/// as a signed delta, correct across a single wraparound (the gap between
/// two timestamps the protocol ever compares is always far smaller than
/// `u32::MAX / 2`).
fn wrapping_diff(a: u32, b: u32) -> i64 {
    b.wrapping_sub(a) as i32 as i64
}

/// Drives one child connection's repeating TIME_SYNC rounds. The parent side
/// of the exchange is stateless (see [`handle_request_as_parent`]) since it
/// never initiates and has nothing to remember between messages.
#[derive(Debug, Clone)]
pub struct TimeSyncSchedule {
    config: TimeSyncConfig,
    next_due_micros: u64,
    /// `t0` of the outstanding request, so a reply can be matched and a
    /// stale/duplicate reply (from a previous round, or a forged one)
    /// rejected instead of corrupting the clock.
    pending_t0: Option<u32>,
}

impl TimeSyncSchedule {
    /// A freshly established connection syncs immediately (§4.5
    /// Scheduling: "Newly established Connections trigger an immediate
    /// run, bypassing the period").
    pub fn new(config: TimeSyncConfig, now_micros: u64) -> Self {
        Self {
            config,
            next_due_micros: now_micros,
            pending_t0: None,
        }
    }

    pub fn is_due(&self, now_micros: u64) -> bool {
        self.pending_t0.is_none() && now_micros >= self.next_due_micros
    }

    /// Build the phase-0 request and reschedule the next round. `node_time`
    /// is this node's current mesh timestamp (`t0`); `now_micros` is the
    /// local monotonic reading used purely for scheduling the next due time.
    pub fn build_request(
        &mut self,
        node_time: u32,
        now_micros: u64,
        rng: &mut impl Rng,
    ) -> TimeSyncBody {
        self.pending_t0 = Some(node_time);
        self.next_due_micros = now_micros + self.config.jittered_interval_micros(rng);
        trace!(t0 = node_time, next_due_micros = self.next_due_micros, "time sync request built");
        TimeSyncBody {
            phase: TimeSyncPhase::Request,
            t0: node_time,
            t1: None,
            t2: None,
        }
    }

    /// Consume a phase-1 reply and compute the offset/delay (§4.5 step 3).
    /// Rejects a reply that doesn't match the outstanding request instead of
    /// panicking or silently trusting unsolicited data.
    pub fn complete(
        &mut self,
        reply: TimeSyncBody,
        node_time_now: u32,
    ) -> Result<TimeSyncOutcome, TimeSyncError> {
        if reply.phase != TimeSyncPhase::Reply {
            return Err(TimeSyncError::WrongPhase);
        }
        let expected_t0 = self.pending_t0.ok_or(TimeSyncError::UnexpectedT0 {
            expected: 0,
            received: reply.t0,
        })?;
        if reply.t0 != expected_t0 {
            return Err(TimeSyncError::UnexpectedT0 {
                expected: expected_t0,
                received: reply.t0,
            });
        }
        let t1 = reply.t1.ok_or(TimeSyncError::WrongPhase)?;
        let t2 = reply.t2.ok_or(TimeSyncError::WrongPhase)?;
        let t0 = reply.t0;
        let t3 = node_time_now;

        // d = ((t1-t0) + (t3-t2)) / 2 ; offset = ((t1-t0) + (t2-t3)) / 2
        let forward = wrapping_diff(t0, t1);
        let backward = wrapping_diff(t2, t3);
        let delay_micros = ((forward + backward) / 2).max(0) as u32;
        let offset_micros = (forward - backward) / 2;

        self.pending_t0 = None;
        debug!(delay_micros, offset_micros, "time sync round complete");
        Ok(TimeSyncOutcome {
            offset_micros,
            delay_micros,
        })
    }
}

/// The parent side of one exchange (§4.5 step 2). Stateless: the parent
/// only ever echoes `t0` back with its own receive/send timestamps.
pub fn handle_request_as_parent(
    request: TimeSyncBody,
    node_time_receive: u32,
    node_time_reply: u32,
) -> Result<TimeSyncBody, TimeSyncError> {
    if request.phase != TimeSyncPhase::Request {
        return Err(TimeSyncError::WrongPhase);
    }
    Ok(TimeSyncBody {
        phase: TimeSyncPhase::Reply,
        t0: request.t0,
        t1: Some(node_time_receive),
        t2: Some(node_time_reply),
    })
}
