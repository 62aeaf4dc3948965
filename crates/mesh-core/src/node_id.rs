//! NodeId: the 32-bit, process-wide-unique identifier every mesh node carries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque 32-bit node identifier, derived once at startup (e.g. from a MAC address)
/// and never reassigned for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const BROADCAST_ORIGIN: NodeId = NodeId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// `true` for the sentinel value a Connection's `peerNodeId` carries before
    /// the handshake completes.
    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}
