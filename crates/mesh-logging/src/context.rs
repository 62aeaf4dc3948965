//! NodeId injection for logging: a thread-local scope that tags every
//! tracing span opened within it with the owning node's id, so log lines
//! from a multi-node test harness running several meshes in one process can
//! be told apart.

use std::cell::RefCell;

use mesh_core::NodeId;

#[derive(Debug, Clone)]
pub struct NodeContextData {
    pub node_id: NodeId,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard: sets the node context for the current thread while alive,
/// restoring whatever was set before on drop.
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    pub fn new(node_id: NodeId) -> Self {
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow().clone());
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(NodeContextData { node_id }));
        Self { previous }
    }

    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node_id() -> Option<NodeId> {
        Self::current().map(|ctx| ctx.node_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}
