//! The per-peer session state machine (§4.2).
//!
//! `Connection` is a pure value: feed it bytes and a clock reading, get back
//! the events the owning Router should act on. It does not own a transport
//! or a back-pointer to Topology — per the design note on cyclic
//! references, the Router/Topology owns `Connection` values by strong
//! ownership and resolves peers through a stable [`ConnectionId`], never the
//! other way around. All I/O (the actual socket read/write loop of §5.1)
//! lives in the `mesh` façade crate.

use std::collections::HashSet;
use std::fmt;

use mesh_buffer::Buffer;
use mesh_core::{Message, NodeId};
use tracing::{debug, instrument, trace, warn};

use crate::config::ConnectionConfig;

/// Stable integer handle a Connection carries back to the Router, in place
/// of a cyclic back-pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a Connection was closed (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Transport,
    Timeout,
    Loop,
    Duplicate,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Transport => "transport",
            CloseReason::Timeout => "timeout",
            CloseReason::Loop => "loop",
            CloseReason::Duplicate => "duplicate",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshake,
    Established,
    Closed,
}

/// Output of feeding bytes (or time) into a Connection. The Router matches
/// on these to drive topology/routing/dispatch; Connection itself never
/// reaches into any of that.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake completed: `peer_node_id` is now known and `subtree_nodes`
    /// populated from the peer's first handshake message. `needs_reply` is
    /// set when we are the AP side answering a NODE_SYNC_REQUEST and must
    /// send back a NODE_SYNC_REPLY carrying our own subtree view (which
    /// only the Router/Topology can compute).
    Established {
        peer_node_id: NodeId,
        needs_reply: bool,
    },
    /// A fully decoded, post-handshake message ready for the Router.
    Message(Message),
    /// The peer's advertised subtree contains our own NodeId (§3 invariant
    /// 4 / §4.2c). The Router must close this connection with `Loop`.
    LoopDetected,
    /// A message body failed to parse as JSON/Message.
    ParseError,
    /// The accumulated un-terminated run exceeded the message cap.
    BufferOverflow,
}

/// One peer session (§3 Connection / §4.2).
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    /// True if we dialed out to the peer (we are its child / STA side);
    /// false if the peer dialed in to us (we are its parent / AP side).
    is_station: bool,
    peer_node_id: NodeId,
    subtree_nodes: HashSet<NodeId>,
    last_received_micros: u64,
    time_delay_micros: Option<u32>,
    new_connection: bool,
    consecutive_parse_errors: u32,
    config: ConnectionConfig,
    buffer: Buffer,
}

impl Connection {
    pub fn new(id: ConnectionId, is_station: bool, config: ConnectionConfig, now_micros: u64) -> Self {
        let buffer = Buffer::new(config.message_cap_bytes);
        Self {
            id,
            state: ConnectionState::Handshake,
            is_station,
            peer_node_id: NodeId::new(0),
            subtree_nodes: HashSet::new(),
            last_received_micros: now_micros,
            time_delay_micros: None,
            new_connection: true,
            consecutive_parse_errors: 0,
            config,
            buffer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_station(&self) -> bool {
        self.is_station
    }

    /// Flip which side plays the station role. Used to resolve the
    /// simultaneous-connect race (§9 open question): the lower NodeId keeps
    /// `is_station = true`.
    pub fn set_is_station(&mut self, is_station: bool) {
        self.is_station = is_station;
    }

    pub fn peer_node_id(&self) -> NodeId {
        self.peer_node_id
    }

    pub fn subtree_nodes(&self) -> &HashSet<NodeId> {
        &self.subtree_nodes
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    pub fn is_new_connection(&self) -> bool {
        self.new_connection
    }

    pub fn time_delay_micros(&self) -> Option<u32> {
        self.time_delay_micros
    }

    pub fn set_time_delay_micros(&mut self, delay: u32) {
        self.time_delay_micros = Some(delay);
    }

    pub fn last_received_micros(&self) -> u64 {
        self.last_received_micros
    }

    /// The message the station side sends on transport-up (§4.2 Handshake
    /// step 1): a NODE_SYNC_REQUEST carrying `{self}` as its subtree.
    pub fn handshake_request(&self, local_node_id: NodeId) -> Message {
        Message::NodeSyncRequest {
            from: local_node_id,
            dest: self.peer_node_id, // 0 (unset) until the peer's `from` is known; Router fills dest on send.
            subtree: vec![local_node_id],
        }
    }

    /// Feed newly-arrived bytes. Returns every event produced, in order.
    #[instrument(skip(self, bytes), fields(connection = %self.id))]
    pub fn receive(&mut self, bytes: &[u8], local_node_id: NodeId, now_micros: u64) -> Vec<ConnectionEvent> {
        self.last_received_micros = now_micros;
        let mut events = Vec::new();
        if self.state == ConnectionState::Closed {
            return events;
        }
        for frame in self.buffer.feed(bytes) {
            match frame {
                Ok(body) => {
                    self.consecutive_parse_errors = 0;
                    match Message::decode(&body, self.config.message_cap_bytes) {
                        Ok(message) => events.extend(self.handle_message(message, local_node_id)),
                        Err(err) => {
                            warn!(connection = %self.id, error = %err, "message decode failed");
                            events.push(ConnectionEvent::ParseError);
                        }
                    }
                }
                Err(err) => {
                    warn!(connection = %self.id, error = %err, "buffer overflow");
                    self.consecutive_parse_errors += 1;
                    events.push(ConnectionEvent::BufferOverflow);
                }
            }
        }
        events
    }

    fn handle_message(&mut self, message: Message, local_node_id: NodeId) -> Vec<ConnectionEvent> {
        if self.state == ConnectionState::Handshake {
            return self.handle_handshake_message(message, local_node_id);
        }
        // §3 invariant 5: a connection that has completed handshake may
        // carry any message type; routing decisions are the Router's job.
        vec![ConnectionEvent::Message(message)]
    }

    fn handle_handshake_message(&mut self, message: Message, local_node_id: NodeId) -> Vec<ConnectionEvent> {
        let (subtree, is_request) = match &message {
            Message::NodeSyncRequest { subtree, .. } => (subtree.clone(), true),
            Message::NodeSyncReply { subtree, .. } => (subtree.clone(), false),
            other => {
                // §3 invariant 5: only handshake messages are permitted
                // before peerNodeId is known. Anything else is dropped.
                trace!(connection = %self.id, type_id = other.type_id(), "dropped pre-handshake message");
                return Vec::new();
            }
        };

        let peer_node_id = message.from();
        let subtree_set: HashSet<NodeId> = subtree.into_iter().collect();

        if subtree_set.contains(&local_node_id) {
            debug!(connection = %self.id, peer = %peer_node_id, "loop detected in handshake subtree");
            return vec![ConnectionEvent::LoopDetected];
        }

        self.peer_node_id = peer_node_id;
        self.subtree_nodes = subtree_set;
        self.state = ConnectionState::Established;
        self.new_connection = false;

        debug!(connection = %self.id, peer = %peer_node_id, "handshake established");
        vec![ConnectionEvent::Established {
            peer_node_id,
            needs_reply: is_request,
        }]
    }

    /// Update this connection's subtree view from a post-handshake
    /// NODE_SYNC/NODE_SYNC_REPLY (Topology's job to call this; Connection
    /// itself never peeks into a `Message` after the handshake completes).
    pub fn update_subtree(&mut self, subtree: HashSet<NodeId>) {
        self.subtree_nodes = subtree;
    }

    /// §4.2 Liveness: the owning Router should call this periodically and
    /// act on `Some(CloseReason::Timeout)`.
    pub fn check_liveness(&self, now_micros: u64) -> Option<CloseReason> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        let elapsed_ms = now_micros.saturating_sub(self.last_received_micros) / 1_000;
        if elapsed_ms >= self.config.liveness_timeout_ms {
            Some(CloseReason::Timeout)
        } else {
            None
        }
    }

    pub fn consecutive_parse_errors(&self) -> u32 {
        self.consecutive_parse_errors
    }

    pub fn exceeded_parse_error_budget(&self) -> bool {
        self.consecutive_parse_errors >= self.config.max_consecutive_parse_errors
    }

    /// Terminate the session. Idempotent; calling twice is a no-op on the
    /// second call.
    pub fn close(&mut self, reason: CloseReason) -> CloseReason {
        self.state = ConnectionState::Closed;
        debug!(connection = %self.id, reason = %reason, "connection closed");
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_buffer::frame as wire_frame;

    fn established_pair(local: u32, peer: u32) -> (Connection, Connection) {
        let mut station = Connection::new(ConnectionId(1), true, ConnectionConfig::default(), 0);
        let mut ap = Connection::new(ConnectionId(2), false, ConnectionConfig::default(), 0);
        let local_id = NodeId::new(local);
        let peer_id = NodeId::new(peer);

        let request = station.handshake_request(local_id);
        let wire = wire_frame(&request.encode(4096).unwrap());
        let events = ap.receive(&wire, peer_id, 10);
        assert!(matches!(events[0], ConnectionEvent::Established { needs_reply: true, .. }));

        let reply = Message::NodeSyncReply {
            from: peer_id,
            dest: local_id,
            subtree: vec![peer_id],
        };
        let wire = wire_frame(&reply.encode(4096).unwrap());
        let events = station.receive(&wire, local_id, 10);
        assert!(matches!(events[0], ConnectionEvent::Established { needs_reply: false, .. }));

        (station, ap)
    }

    #[test]
    fn handshake_establishes_both_sides() {
        let (station, ap) = established_pair(2, 1);
        assert!(station.is_established());
        assert!(ap.is_established());
        assert_eq!(station.peer_node_id(), NodeId::new(1));
        assert_eq!(ap.peer_node_id(), NodeId::new(2));
    }

    #[test]
    fn loop_detected_when_peer_subtree_contains_self() {
        let mut ap = Connection::new(ConnectionId(1), false, ConnectionConfig::default(), 0);
        let local_id = NodeId::new(1);
        let request = Message::NodeSyncRequest {
            from: NodeId::new(2),
            dest: local_id,
            subtree: vec![NodeId::new(2), local_id],
        };
        let wire = wire_frame(&request.encode(4096).unwrap());
        let events = ap.receive(&wire, local_id, 0);
        assert_eq!(events, vec![ConnectionEvent::LoopDetected]);
        assert!(!ap.is_established());
    }

    #[test]
    fn non_handshake_message_before_handshake_is_dropped() {
        let mut ap = Connection::new(ConnectionId(1), false, ConnectionConfig::default(), 0);
        let msg = Message::Broadcast {
            from: NodeId::new(2),
            payload: serde_json::json!({}),
        };
        let wire = wire_frame(&msg.encode(4096).unwrap());
        let events = ap.receive(&wire, NodeId::new(1), 0);
        assert!(events.is_empty());
        assert!(!ap.is_established());
    }

    #[test]
    fn liveness_timeout_fires_after_threshold() {
        let cfg = ConnectionConfig::default().with_liveness_timeout_ms(1_000);
        let conn = Connection::new(ConnectionId(1), true, cfg, 0);
        assert!(conn.check_liveness(500_000).is_none());
        assert_eq!(conn.check_liveness(1_000_001), Some(CloseReason::Timeout));
    }

    #[test]
    fn post_handshake_messages_pass_through() {
        let (mut station, _ap) = established_pair(2, 1);
        let msg = Message::Single {
            from: NodeId::new(1),
            dest: NodeId::new(2),
            payload: serde_json::json!({"x": 1}),
        };
        let wire = wire_frame(&msg.encode(4096).unwrap());
        let events = station.receive(&wire, NodeId::new(2), 20);
        assert_eq!(events, vec![ConnectionEvent::Message(msg)]);
    }

    #[test]
    fn close_is_idempotent() {
        let mut conn = Connection::new(ConnectionId(1), true, ConnectionConfig::default(), 0);
        assert_eq!(conn.close(CloseReason::Shutdown), CloseReason::Shutdown);
        assert_eq!(conn.state(), ConnectionState::Closed);
        // A second close is a harmless no-op.
        assert_eq!(conn.close(CloseReason::Transport), CloseReason::Transport);
    }

    #[test]
    fn bytes_after_close_produce_no_events() {
        let mut conn = Connection::new(ConnectionId(1), true, ConnectionConfig::default(), 0);
        conn.close(CloseReason::Shutdown);
        let events = conn.receive(b"\0junk\0", NodeId::new(1), 0);
        assert!(events.is_empty());
    }
}
