//! Packet dispatch by destination (§4.3): `Router` owns a [`Topology`] and
//! turns inbound bytes / local originations into the [`RoutingAction`]s the
//! `mesh` façade executes against real connections.

use mesh_connection::{CloseReason, Connection, ConnectionEvent, ConnectionId};
use mesh_core::{Message, NodeId};
use tracing::{instrument, warn};

use crate::topology::Topology;

/// Side effect a caller (the `mesh` façade) must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingAction {
    /// Write `message` out over `connection`.
    SendOn {
        connection: ConnectionId,
        message: Message,
    },
    /// Hand `message` to Plugin dispatch for this node.
    DeliverLocal(Message),
    /// Tear down `connection`; the caller should also stop polling its
    /// transport.
    CloseConnection {
        connection: ConnectionId,
        reason: CloseReason,
    },
    /// No route existed for `dest` (§7 Routing unreachable): dropped,
    /// logged, originator not notified (best-effort semantics).
    Unreachable { dest: NodeId },
    /// `connection` just finished its handshake and was not a duplicate.
    /// The caller uses this to fire the new-connection callback and, for
    /// station connections, start time sync.
    Established {
        connection: ConnectionId,
        peer_node_id: NodeId,
        is_station: bool,
    },
}

pub struct Router {
    topology: Topology,
}

impl Router {
    pub fn new(node_id: NodeId, is_root: bool) -> Self {
        Self {
            topology: Topology::new(node_id, is_root),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn node_id(&self) -> NodeId {
        self.topology.node_id()
    }

    /// The connection a direct neighbor's NodeId is reachable on, if it is
    /// an established peer of this node (not merely somewhere in its
    /// subtree). See [`Topology::connection_for_peer`].
    pub fn connection_for_peer(&self, peer_node_id: NodeId) -> Option<ConnectionId> {
        self.topology.connection_for_peer(peer_node_id)
    }

    pub fn add_connection(&mut self, conn: Connection) -> ConnectionId {
        self.topology.add_connection(conn)
    }

    /// §4.3 findRoute: the connection whose subtree contains `dest`, or the
    /// station connection as the "send up the tree" fallback, or `None`.
    pub fn find_route(&self, dest: NodeId) -> Option<ConnectionId> {
        for id in self.topology.established_connection_ids() {
            if let Some(conn) = self.topology.connection(id) {
                if conn.subtree_nodes().contains(&dest) {
                    return Some(id);
                }
            }
        }
        self.topology.station_connection_id()
    }

    /// Originate a message locally (`from` is assumed already set to us).
    pub fn send(&mut self, msg: Message) -> Vec<RoutingAction> {
        match msg.dest() {
            Some(dest) if dest == self.node_id() => vec![RoutingAction::DeliverLocal(msg)],
            Some(dest) => match self.find_route(dest) {
                Some(connection) => vec![RoutingAction::SendOn {
                    connection,
                    message: msg,
                }],
                None => {
                    warn!(%dest, "no route for originated message");
                    vec![RoutingAction::Unreachable { dest }]
                }
            },
            None => {
                let mut actions = vec![RoutingAction::DeliverLocal(msg.clone())];
                actions.extend(self.broadcast(msg, None));
                actions
            }
        }
    }

    /// §4.3 broadcast: fan out to every established connection except
    /// `originator` (the connection the flood arrived on, if any).
    pub fn broadcast(&self, msg: Message, originator: Option<ConnectionId>) -> Vec<RoutingAction> {
        self.topology
            .established_connection_ids()
            .filter(|id| Some(*id) != originator)
            .map(|id| RoutingAction::SendOn {
                connection: id,
                message: msg.clone(),
            })
            .collect()
    }

    fn route_to(&self, dest: NodeId, msg: Message) -> Vec<RoutingAction> {
        if dest == self.node_id() {
            return vec![RoutingAction::DeliverLocal(msg)];
        }
        match self.find_route(dest) {
            Some(connection) => vec![RoutingAction::SendOn {
                connection,
                message: msg,
            }],
            None => {
                warn!(%dest, "unreachable destination, dropping");
                vec![RoutingAction::Unreachable { dest }]
            }
        }
    }

    /// §4.4 step 3: tell every established peer what's now reachable
    /// through us, minus what they already know about themselves.
    fn propagate_node_sync(&self, exclude: Option<ConnectionId>) -> Vec<RoutingAction> {
        let root_id = self.topology.known_root_id();
        self.topology
            .established_connection_ids()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| {
                let conn = self.topology.connection(id)?;
                let subtree = self.topology.subtree_for_peer(id);
                Some(RoutingAction::SendOn {
                    connection: id,
                    message: Message::NodeSync {
                        from: self.node_id(),
                        dest: conn.peer_node_id(),
                        subtree,
                        root_id,
                    },
                })
            })
            .collect()
    }

    /// Feed bytes received on `conn_id`; returns every action the caller
    /// must carry out, in order.
    #[instrument(skip(self, bytes), fields(node = %self.node_id(), connection = %conn_id))]
    pub fn handle_inbound_bytes(
        &mut self,
        conn_id: ConnectionId,
        bytes: &[u8],
        now_micros: u64,
    ) -> Vec<RoutingAction> {
        let node_id = self.node_id();
        let events = match self.topology.connection_mut(conn_id) {
            Some(conn) => conn.receive(bytes, node_id, now_micros),
            None => return Vec::new(),
        };
        let mut actions = Vec::new();
        for event in events {
            actions.extend(self.process_event(conn_id, event));
        }
        actions
    }

    fn process_event(&mut self, conn_id: ConnectionId, event: ConnectionEvent) -> Vec<RoutingAction> {
        match event {
            ConnectionEvent::Established {
                peer_node_id,
                needs_reply,
            } => self.on_established(conn_id, peer_node_id, needs_reply),
            ConnectionEvent::Message(msg) => self.handle_message(conn_id, msg),
            ConnectionEvent::LoopDetected => vec![RoutingAction::CloseConnection {
                connection: conn_id,
                reason: CloseReason::Loop,
            }],
            ConnectionEvent::ParseError | ConnectionEvent::BufferOverflow => {
                match self.topology.connection(conn_id) {
                    Some(conn) if conn.exceeded_parse_error_budget() => {
                        vec![RoutingAction::CloseConnection {
                            connection: conn_id,
                            reason: CloseReason::Transport,
                        }]
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    fn on_established(
        &mut self,
        conn_id: ConnectionId,
        peer_node_id: NodeId,
        needs_reply: bool,
    ) -> Vec<RoutingAction> {
        if let Some(dup) = self
            .topology
            .other_established_with_peer(peer_node_id, conn_id)
        {
            // §9 decision: the side with the lower NodeId keeps the
            // station role. Whichever of the two connections matches that
            // rule survives; the other closes, regardless of which one
            // established first.
            let new_is_station = self
                .topology
                .connection(conn_id)
                .map(|c| c.is_station())
                .unwrap_or(false);
            let new_should_survive = new_is_station == (self.node_id() < peer_node_id);
            let close_id = if new_should_survive { dup } else { conn_id };
            warn!(%peer_node_id, %close_id, "duplicate peer connection, applying lowest-NodeId-wins tie-break");
            let close_actions = vec![RoutingAction::CloseConnection {
                connection: close_id,
                reason: CloseReason::Duplicate,
            }];
            if close_id == conn_id {
                return close_actions;
            }
            // The pre-existing connection loses; `conn_id` falls through
            // to establish normally below.
            let mut actions = close_actions;
            actions.extend(self.on_established_fresh(conn_id, peer_node_id, needs_reply));
            return actions;
        }

        self.on_established_fresh(conn_id, peer_node_id, needs_reply)
    }

    fn on_established_fresh(
        &mut self,
        conn_id: ConnectionId,
        peer_node_id: NodeId,
        needs_reply: bool,
    ) -> Vec<RoutingAction> {
        let is_station = self
            .topology
            .connection(conn_id)
            .map(|c| c.is_station())
            .unwrap_or(false);
        let mut actions = vec![RoutingAction::Established {
            connection: conn_id,
            peer_node_id,
            is_station,
        }];
        if needs_reply {
            let subtree = self.topology.subtree_for_peer(conn_id);
            actions.push(RoutingAction::SendOn {
                connection: conn_id,
                message: Message::NodeSyncReply {
                    from: self.node_id(),
                    dest: peer_node_id,
                    subtree,
                },
            });
        }
        // Propagate to every established connection, including the new
        // one, so it learns the current root claim without waiting for the
        // next unrelated topology change.
        actions.extend(self.propagate_node_sync(None));
        actions
    }

    fn handle_message(&mut self, conn_id: ConnectionId, msg: Message) -> Vec<RoutingAction> {
        match msg {
            Message::NodeSync {
                subtree, root_id, ..
            } => self.on_node_sync(conn_id, subtree, root_id),
            Message::NodeSyncRequest { .. } | Message::NodeSyncReply { .. } => {
                // Only expected during handshake; if one arrives afterward
                // (e.g. a retransmit) refresh the subtree defensively.
                Vec::new()
            }
            Message::Broadcast { .. } => {
                let mut actions = vec![RoutingAction::DeliverLocal(msg.clone())];
                actions.extend(self.broadcast(msg, Some(conn_id)));
                actions
            }
            Message::OtaAnnounce { .. } => {
                let mut actions = vec![RoutingAction::DeliverLocal(msg.clone())];
                actions.extend(self.broadcast(msg, Some(conn_id)));
                actions
            }
            Message::User { dest: None, .. } => {
                let mut actions = vec![RoutingAction::DeliverLocal(msg.clone())];
                actions.extend(self.broadcast(msg, Some(conn_id)));
                actions
            }
            // §4.7: a broadcast-mode Data chunk is flooded like BROADCAST
            // (so every listening receiver assembles it from one emission)
            // even though it still rides the OTA_TRANSFER envelope.
            Message::OtaTransfer {
                ref transfer,
                ..
            } if transfer.is_data() && transfer.announce.broadcasted => {
                let mut actions = vec![RoutingAction::DeliverLocal(msg.clone())];
                actions.extend(self.broadcast(msg, Some(conn_id)));
                actions
            }
            Message::Single { dest, .. }
            | Message::TimeSync { dest, .. }
            | Message::TimeDelay { dest, .. }
            | Message::OtaTransfer { dest, .. }
            | Message::User { dest: Some(dest), .. } => self.route_to(dest, msg),
        }
    }

    fn on_node_sync(
        &mut self,
        conn_id: ConnectionId,
        subtree: Vec<NodeId>,
        root_id: Option<NodeId>,
    ) -> Vec<RoutingAction> {
        let subtree_set: std::collections::HashSet<NodeId> = subtree.into_iter().collect();
        if subtree_set.contains(&self.node_id()) {
            warn!(connection = %conn_id, "peer's NODE_SYNC now contains our own NodeId, closing as loop");
            return vec![RoutingAction::CloseConnection {
                connection: conn_id,
                reason: CloseReason::Loop,
            }];
        }
        if let Some(conn) = self.topology.connection_mut(conn_id) {
            conn.update_subtree(subtree_set);
        }
        self.topology.set_peer_root_id(conn_id, root_id);
        self.topology.reconcile_root_claim();
        self.propagate_node_sync(Some(conn_id))
    }

    /// §4.4 step 3 / §6 `nodeSyncInterval`: re-advertise our current view to
    /// every established peer, independent of any topology change. Guards
    /// against a NODE_SYNC silently failing to reach a peer.
    pub fn tick_node_sync(&self) -> Vec<RoutingAction> {
        self.propagate_node_sync(None)
    }

    /// §4.2 Liveness: close any connection silent past its timeout.
    pub fn tick_liveness(&mut self, now_micros: u64) -> Vec<RoutingAction> {
        let timed_out: Vec<ConnectionId> = self
            .topology
            .connection_ids()
            .filter(|id| {
                self.topology
                    .connection(*id)
                    .and_then(|c| c.check_liveness(now_micros))
                    .is_some()
            })
            .collect();
        let mut actions = Vec::new();
        for id in timed_out {
            actions.extend(self.close_connection(id, CloseReason::Timeout));
        }
        actions
    }

    /// Destroy a connection and propagate the resulting topology change to
    /// everyone left (§3 Lifecycle).
    pub fn close_connection(&mut self, id: ConnectionId, reason: CloseReason) -> Vec<RoutingAction> {
        if self.topology.close(id, reason).is_some() {
            self.propagate_node_sync(None)
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_buffer::frame as wire_frame;
    use mesh_connection::ConnectionConfig;

    fn connect_pair(router_a: &mut Router, id_a: ConnectionId, router_b: &mut Router, id_b: ConnectionId) {
        let node_a = router_a.node_id();
        let node_b = router_b.node_id();
        router_a.add_connection(Connection::new(id_a, true, ConnectionConfig::default(), 0));
        router_b.add_connection(Connection::new(id_b, false, ConnectionConfig::default(), 0));

        let request = router_a
            .topology
            .connection(id_a)
            .unwrap()
            .handshake_request(node_a);
        let wire = wire_frame(&request.encode(4096).unwrap());
        let actions_b = router_b.handle_inbound_bytes(id_b, &wire, 0);

        for action in actions_b {
            if let RoutingAction::SendOn { message, .. } = action {
                let wire = wire_frame(&message.encode(4096).unwrap());
                router_a.handle_inbound_bytes(id_a, &wire, 0);
            }
        }
        let _ = node_b;
    }

    #[test]
    fn s1_bridge_and_three_leaves() {
        let mut root = Router::new(NodeId::new(1), true);
        let mut a = Router::new(NodeId::new(2), false);
        let mut b = Router::new(NodeId::new(3), false);
        let mut c = Router::new(NodeId::new(4), false);

        connect_pair(&mut a, ConnectionId(1), &mut root, ConnectionId(101));
        connect_pair(&mut b, ConnectionId(1), &mut root, ConnectionId(102));
        connect_pair(&mut c, ConnectionId(1), &mut root, ConnectionId(103));

        assert_eq!(root.find_route(NodeId::new(2)), Some(ConnectionId(101)));
        assert_eq!(root.find_route(NodeId::new(3)), Some(ConnectionId(102)));
        assert_eq!(root.find_route(NodeId::new(4)), Some(ConnectionId(103)));
    }

    #[test]
    fn unreachable_destination_is_dropped_not_panicking() {
        let mut router = Router::new(NodeId::new(1), true);
        let msg = Message::Single {
            from: NodeId::new(1),
            dest: NodeId::new(99),
            payload: serde_json::json!({}),
        };
        let actions = router.send(msg);
        assert_eq!(actions, vec![RoutingAction::Unreachable { dest: NodeId::new(99) }]);
    }

    #[test]
    fn broadcast_excludes_originator() {
        let mut router = Router::new(NodeId::new(1), true);
        router.add_connection(Connection::new(ConnectionId(1), false, ConnectionConfig::default(), 0));
        router.add_connection(Connection::new(ConnectionId(2), false, ConnectionConfig::default(), 0));

        for (conn_id, peer) in [(ConnectionId(1), 2u32), (ConnectionId(2), 3u32)] {
            let peer_id = NodeId::new(peer);
            let request = Message::NodeSyncRequest {
                from: peer_id,
                dest: NodeId::new(1),
                subtree: vec![peer_id],
            };
            let wire = wire_frame(&request.encode(4096).unwrap());
            router.handle_inbound_bytes(conn_id, &wire, 0);
        }

        let msg = Message::Broadcast {
            from: NodeId::new(2),
            payload: serde_json::json!({}),
        };
        let actions = router.broadcast(msg, Some(ConnectionId(1)));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], RoutingAction::SendOn { connection: ConnectionId(2), .. }));
    }
}
