//! Ties [`TimeSyncSchedule`] instances to live connections (§4.5
//! Scheduling/Propagation) so the façade has one entry point instead of
//! juggling a `HashMap` itself.

use std::collections::HashMap;

use mesh_connection::ConnectionId;
use mesh_core::{NodeId, TimeSyncBody};
use rand::Rng;
use tracing::instrument;

use crate::config::TimeSyncConfig;
use crate::error::TimeSyncError;
use crate::sync::{handle_request_as_parent, TimeSyncOutcome, TimeSyncSchedule};

/// What the façade should do after feeding the manager a tick or a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncAction {
    /// Send a phase-0 request on `connection`, carrying `t0`.
    SendRequest { connection: ConnectionId, t0: u32 },
    /// Send a phase-1 reply on `connection`.
    SendReply { connection: ConnectionId, body: TimeSyncBody },
    /// A round against `connection` completed; apply `outcome` to this
    /// node's `MeshClock` (§4.5 step 3).
    ApplyOffset {
        connection: ConnectionId,
        outcome: TimeSyncOutcome,
    },
}

/// One schedule per connection this node runs TIME_SYNC against as the
/// child (i.e. its station connection — §4.5 is child-initiated only).
#[derive(Default)]
pub struct TimeSyncManager {
    schedules: HashMap<ConnectionId, TimeSyncSchedule>,
}

impl TimeSyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) tracking a connection as a sync target. Called
    /// when a station connection completes its handshake, per the
    /// "newly established Connections trigger an immediate run" rule.
    pub fn track(&mut self, connection: ConnectionId, config: TimeSyncConfig, now_micros: u64) {
        self.schedules
            .insert(connection, TimeSyncSchedule::new(config, now_micros));
    }

    pub fn untrack(&mut self, connection: ConnectionId) {
        self.schedules.remove(&connection);
    }

    pub fn is_tracking(&self, connection: ConnectionId) -> bool {
        self.schedules.contains_key(&connection)
    }

    /// Check every tracked connection and issue a request for any that are
    /// due. `node_time` is read once per tick (the same instant for every
    /// due connection, matching a single scheduler tick).
    #[instrument(skip(self, rng))]
    pub fn tick(
        &mut self,
        node_time: u32,
        now_micros: u64,
        rng: &mut impl Rng,
    ) -> Vec<TimeSyncAction> {
        let mut actions = Vec::new();
        for (&connection, schedule) in self.schedules.iter_mut() {
            if schedule.is_due(now_micros) {
                let body = schedule.build_request(node_time, now_micros, rng);
                actions.push(TimeSyncAction::SendRequest {
                    connection,
                    t0: body.t0,
                });
            }
        }
        actions
    }

    /// Feed an incoming TIME_SYNC body for `connection`. Dispatches to the
    /// parent or child half of the exchange by `phase`; a `Request` never
    /// touches `self.schedules` (the parent role is stateless), a `Reply`
    /// only succeeds if this node is tracking `connection` as a child.
    pub fn handle_message(
        &mut self,
        connection: ConnectionId,
        body: TimeSyncBody,
        node_time_now: u32,
    ) -> Result<TimeSyncAction, TimeSyncError> {
        match body.phase {
            mesh_core::TimeSyncPhase::Request => {
                let reply = handle_request_as_parent(body, node_time_now, node_time_now)?;
                Ok(TimeSyncAction::SendReply {
                    connection,
                    body: reply,
                })
            }
            mesh_core::TimeSyncPhase::Reply => {
                let schedule = self
                    .schedules
                    .get_mut(&connection)
                    .ok_or(TimeSyncError::NoStationConnection)?;
                let outcome = schedule.complete(body, node_time_now)?;
                Ok(TimeSyncAction::ApplyOffset { connection, outcome })
            }
        }
    }
}

/// Build the wire `Message` for a `SendRequest`/`SendReply` action. Kept
/// free-standing (rather than a method) since it only needs `NodeId`s the
/// caller already has on hand from `Topology`.
pub fn request_message(from: NodeId, dest: NodeId, t0: u32) -> mesh_core::Message {
    mesh_core::Message::TimeSync {
        from,
        dest,
        body: TimeSyncBody {
            phase: mesh_core::TimeSyncPhase::Request,
            t0,
            t1: None,
            t2: None,
        },
    }
}

pub fn reply_message(from: NodeId, dest: NodeId, body: TimeSyncBody) -> mesh_core::Message {
    mesh_core::Message::TimeSync { from, dest, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn tracked_connection_is_due_immediately() {
        let mut manager = TimeSyncManager::new();
        let conn = ConnectionId(1);
        manager.track(conn, TimeSyncConfig::default(), 0);
        let mut rng = StdRng::seed_from_u64(5);
        let actions = manager.tick(1_000, 0, &mut rng);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], TimeSyncAction::SendRequest { connection, .. } if connection == conn));
    }

    #[test]
    fn untracked_connection_never_fires() {
        let mut manager = TimeSyncManager::new();
        let mut rng = StdRng::seed_from_u64(5);
        let actions = manager.tick(1_000, 0, &mut rng);
        assert!(actions.is_empty());
    }

    #[test]
    fn full_cycle_through_manager() {
        let mut child = TimeSyncManager::new();
        let conn = ConnectionId(42);
        child.track(conn, TimeSyncConfig::default(), 0);
        let mut rng = StdRng::seed_from_u64(2);

        let actions = child.tick(500, 0, &mut rng);
        let (connection, t0) = match actions[0] {
            TimeSyncAction::SendRequest { connection, t0 } => (connection, t0),
            _ => panic!("expected SendRequest"),
        };
        assert_eq!(connection, conn);

        let request_body = TimeSyncBody {
            phase: mesh_core::TimeSyncPhase::Request,
            t0,
            t1: None,
            t2: None,
        };
        let reply_action = child.handle_message(conn, request_body, 550).unwrap();
        // A parent never tracks the connection it replies on, so this
        // exercises the stateless branch even though `child` here is
        // standing in for the parent role too.
        let reply_body = match reply_action {
            TimeSyncAction::SendReply { body, .. } => body,
            _ => panic!("expected SendReply"),
        };

        let outcome_action = child.handle_message(conn, reply_body, 600).unwrap();
        assert!(matches!(outcome_action, TimeSyncAction::ApplyOffset { connection, .. } if connection == conn));
    }

    #[test]
    fn reply_for_untracked_connection_errors() {
        let mut manager = TimeSyncManager::new();
        let body = TimeSyncBody {
            phase: mesh_core::TimeSyncPhase::Reply,
            t0: 1,
            t1: Some(2),
            t2: Some(3),
        };
        let err = manager.handle_message(ConnectionId(9), body, 10).unwrap_err();
        assert!(matches!(err, TimeSyncError::NoStationConnection));
    }
}
