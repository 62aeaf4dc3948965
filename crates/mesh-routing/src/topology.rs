//! Topology invariants (§3 Topology state, §4.4): the connection set, root
//! claim bookkeeping, and the structural queries Router builds its
//! forwarding decisions on top of.

use std::collections::{HashMap, HashSet};

use mesh_connection::{CloseReason, Connection, ConnectionId};
use mesh_core::NodeId;

/// Owns every [`Connection`] for this node by strong ownership (§9 design
/// note: no cyclic back-pointers — Connections carry only their stable
/// [`ConnectionId`], resolved back through here).
pub struct Topology {
    node_id: NodeId,
    connections: HashMap<ConnectionId, Connection>,
    /// The lowest root-claimant NodeId each established peer has last
    /// reported reachable through it, learned from `NODE_SYNC.rootId`.
    peer_root_ids: HashMap<ConnectionId, Option<NodeId>>,
    is_root: bool,
}

impl Topology {
    pub fn new(node_id: NodeId, is_root: bool) -> Self {
        Self {
            node_id,
            connections: HashMap::new(),
            peer_root_ids: HashMap::new(),
            is_root,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// §4.4 Root conflict: the tree reachable from this node contains a
    /// root somewhere, whether or not it is this node.
    pub fn contains_root(&self) -> bool {
        self.known_root_id().is_some()
    }

    pub fn add_connection(&mut self, conn: Connection) -> ConnectionId {
        let id = conn.id();
        self.connections.insert(id, conn);
        id
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        self.peer_root_ids.remove(&id);
        self.connections.remove(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    pub fn established_connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections
            .iter()
            .filter(|(_, c)| c.is_established())
            .map(|(id, _)| *id)
    }

    pub fn set_peer_root_id(&mut self, conn: ConnectionId, root_id: Option<NodeId>) {
        self.peer_root_ids.insert(conn, root_id);
    }

    /// §3 invariant 2: the union of every established connection's subtree,
    /// excluding self.
    pub fn all_nodes(&self) -> HashSet<NodeId> {
        let mut set = HashSet::new();
        for conn in self.connections.values() {
            if conn.is_established() {
                set.extend(conn.subtree_nodes().iter().copied());
            }
        }
        set
    }

    /// What `exclude`'s peer should be told is reachable through us: our
    /// whole known world minus whatever it already knows about itself
    /// (§4.4 step 3: "each peer gets our view minus their own subtree").
    pub fn subtree_for_peer(&self, exclude: ConnectionId) -> Vec<NodeId> {
        let mut set = HashSet::new();
        set.insert(self.node_id);
        for (id, conn) in &self.connections {
            if *id == exclude || !conn.is_established() {
                continue;
            }
            set.extend(conn.subtree_nodes().iter().copied());
        }
        set.into_iter().collect()
    }

    /// The lowest NodeId claiming `isRoot = true` anywhere reachable from
    /// this node, including this node itself.
    pub fn known_root_id(&self) -> Option<NodeId> {
        let mut best = if self.is_root { Some(self.node_id) } else { None };
        for (conn_id, candidate) in &self.peer_root_ids {
            let Some(candidate) = candidate else { continue };
            if self
                .connections
                .get(conn_id)
                .map(Connection::is_established)
                .unwrap_or(false)
            {
                best = Some(best.map_or(*candidate, |b: NodeId| b.min(*candidate)));
            }
        }
        best
    }

    /// The best root claimant reachable through a peer, excluding this
    /// node's own claim — used by the root-yield check (§4.4), which must
    /// compare itself against a *competing* claim, not its own.
    pub fn best_foreign_root_id(&self) -> Option<NodeId> {
        self.peer_root_ids
            .iter()
            .filter(|(conn_id, _)| {
                self.connections
                    .get(conn_id)
                    .map(Connection::is_established)
                    .unwrap_or(false)
            })
            .filter_map(|(_, root)| *root)
            .min()
    }

    /// §4.4 Root conflict: yield if a strictly lower NodeId claims root
    /// elsewhere in the tree. Returns `true` if this call changed `is_root`.
    pub fn reconcile_root_claim(&mut self) -> bool {
        if !self.is_root {
            return false;
        }
        if let Some(candidate) = self.best_foreign_root_id() {
            if candidate < self.node_id {
                self.is_root = false;
                return true;
            }
        }
        false
    }

    pub fn other_established_with_peer(
        &self,
        peer: NodeId,
        exclude: ConnectionId,
    ) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(id, c)| **id != exclude && c.is_established() && c.peer_node_id() == peer)
            .map(|(id, _)| *id)
    }

    /// The established connection whose peer is `peer_node_id`, if any.
    /// Used by the façade to recover "which wire did this reply arrive on"
    /// for protocols (TIME_SYNC, OTA unicast) that only ever talk to a
    /// direct neighbor and are addressed by NodeId rather than ConnectionId.
    pub fn connection_for_peer(&self, peer_node_id: NodeId) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, c)| c.is_established() && c.peer_node_id() == peer_node_id)
            .map(|(id, _)| *id)
    }

    pub fn station_connection_id(&self) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, c)| c.is_established() && c.is_station())
            .map(|(id, _)| *id)
    }

    pub fn close(&mut self, id: ConnectionId, reason: CloseReason) -> Option<Connection> {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.close(reason);
        }
        self.remove_connection(id)
    }
}
