//! Routing/topology error taxonomy (§7).

use thiserror::Error;

use mesh_core::NodeId;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no route to node {0}")]
    Unreachable(NodeId),

    #[error("connection {0} not found")]
    UnknownConnection(mesh_connection::ConnectionId),
}
