//! The type -> handler registry (§4.6).
//!
//! A message reaches [`PluginRegistry::dispatch`] only after Router has
//! already decided it is locally addressed (either unicast to us, or a
//! flooded broadcast we're a recipient of by construction). Dispatch itself
//! just picks the one handler shape that applies and runs it defensively.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use mesh_core::Message;
use tracing::{instrument, warn};

use crate::error::{BoxError, PluginError};

type HandlerFn = Box<dyn Fn(&Message) -> Result<(), BoxError> + Send + Sync>;

/// Outcome of one dispatch call, mostly useful for tests and metrics; the
/// façade does not need to act on it beyond logging (§7 policy: handler
/// failures are swallowed, not propagated).
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A handler ran to completion without error.
    Delivered,
    /// A handler panicked or returned an error; already logged.
    Failed(PluginError),
    /// No handler registered for this message's type; silently dropped.
    Unregistered,
}

/// Maps package `type` ids to user handlers. One broadcast handler and one
/// single handler may coexist per type id (§4.6: "a single integer may
/// carry only one handler of each shape").
#[derive(Default)]
pub struct PluginRegistry {
    broadcast: HashMap<u16, HandlerFn>,
    single: HashMap<u16, HandlerFn>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the broadcast-shape handler for `type_id`:
    /// invoked when a message of this type arrives with `dest` absent.
    pub fn on_broadcast<F>(&mut self, type_id: u16, handler: F)
    where
        F: Fn(&Message) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.broadcast.insert(type_id, Box::new(handler));
    }

    /// Register (or replace) the single-shape handler for `type_id`:
    /// invoked when a message of this type is addressed to us directly.
    pub fn on_single<F>(&mut self, type_id: u16, handler: F)
    where
        F: Fn(&Message) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.single.insert(type_id, Box::new(handler));
    }

    pub fn has_broadcast_handler(&self, type_id: u16) -> bool {
        self.broadcast.contains_key(&type_id)
    }

    pub fn has_single_handler(&self, type_id: u16) -> bool {
        self.single.contains_key(&type_id)
    }

    /// Deliver one locally-addressed message to whichever handler shape
    /// applies. `msg.dest().is_none()` selects the broadcast handler
    /// (§4.6: a message both locally addressed and flooded is delivered to
    /// the broadcast handler exactly once, never both); otherwise the
    /// single handler for `msg.dest() == self` is used.
    #[instrument(skip(self, msg), fields(type_id = msg.type_id()))]
    pub fn dispatch(&self, msg: &Message) -> DispatchOutcome {
        let type_id = msg.type_id();
        let table = if msg.dest().is_none() {
            &self.broadcast
        } else {
            &self.single
        };
        let Some(handler) = table.get(&type_id) else {
            return DispatchOutcome::Unregistered;
        };
        match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(source)) => {
                let err = PluginError::HandlerFailed { type_id, source };
                warn!(type_id, error = %err, "plugin handler returned an error");
                DispatchOutcome::Failed(err)
            }
            Err(_) => {
                let err = PluginError::HandlerPanicked { type_id };
                warn!(type_id, "plugin handler panicked");
                DispatchOutcome::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::NodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn broadcast_msg(type_id: u16) -> Message {
        Message::User {
            from: NodeId::new(2),
            dest: None,
            type_id,
            payload: serde_json::json!({}),
        }
    }

    fn single_msg(type_id: u16) -> Message {
        Message::User {
            from: NodeId::new(2),
            dest: Some(NodeId::new(1)),
            type_id,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn unregistered_type_is_silently_dropped() {
        let registry = PluginRegistry::new();
        let outcome = registry.dispatch(&broadcast_msg(150));
        assert!(matches!(outcome, DispatchOutcome::Unregistered));
    }

    #[test]
    fn broadcast_handler_invoked_for_destless_message() {
        let mut registry = PluginRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.on_broadcast(150, move |_msg| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let outcome = registry.dispatch(&broadcast_msg(150));
        assert!(matches!(outcome, DispatchOutcome::Delivered));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_handler_invoked_for_addressed_message() {
        let mut registry = PluginRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.on_single(150, move |_msg| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry.dispatch(&single_msg(150));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_and_single_handlers_for_same_type_are_independent() {
        let mut registry = PluginRegistry::new();
        registry.on_broadcast(150, |_msg| Ok(()));
        // No single handler registered for 150.
        let outcome = registry.dispatch(&single_msg(150));
        assert!(matches!(outcome, DispatchOutcome::Unregistered));
    }

    #[test]
    fn handler_error_is_reported_not_propagated() {
        let mut registry = PluginRegistry::new();
        registry.on_single(150, |_msg| Err("boom".into()));
        let outcome = registry.dispatch(&single_msg(150));
        assert!(matches!(outcome, DispatchOutcome::Failed(PluginError::HandlerFailed { .. })));
    }

    #[test]
    fn handler_panic_is_caught_and_reported() {
        let mut registry = PluginRegistry::new();
        registry.on_single(150, |_msg| panic!("handler exploded"));
        let outcome = registry.dispatch(&single_msg(150));
        assert!(matches!(outcome, DispatchOutcome::Failed(PluginError::HandlerPanicked { .. })));
    }
}
