//! Packet dispatch and tree-topology invariants (§3 Topology state, §4.3
//! Routing, §4.4 Root conflict resolution).
//!
//! [`Router`] owns a [`Topology`] (the connection set plus root-claim
//! bookkeeping) and turns inbound bytes or local originations into
//! [`RoutingAction`]s for the `mesh` façade to execute. Both are pure,
//! synchronous state machines: no tokio, no wall-clock reads, so the tree
//! invariants (acyclicity, subtree disjointness, single root) stay
//! deterministic under test.

mod error;
mod router;
mod topology;

pub use error::RoutingError;
pub use router::{Router, RoutingAction};
pub use topology::Topology;
