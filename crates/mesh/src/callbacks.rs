//! External callback registry (§4.9). Mirrors the source's event-hook shape
//! (`onReceive`, `onNewConnection`, `onChangedConnections`,
//! `onNodeTimeAdjusted`, `onDroppedConnection`) as plain `Fn` closures rather
//! than an async trait: per §5, a handler "may not block indefinitely," so
//! callbacks are synchronous and expected to return quickly or hand work off
//! themselves.

use std::sync::RwLock;

use mesh_core::NodeId;
use serde_json::Value;

pub type OnReceiveFn = Box<dyn Fn(NodeId, &Value) + Send + Sync>;
pub type OnNewConnectionFn = Box<dyn Fn(NodeId) + Send + Sync>;
pub type OnChangedConnectionsFn = Box<dyn Fn() + Send + Sync>;
pub type OnNodeTimeAdjustedFn = Box<dyn Fn(i64) + Send + Sync>;
pub type OnDroppedConnectionFn = Box<dyn Fn(NodeId) + Send + Sync>;

#[derive(Default)]
pub struct Callbacks {
    on_receive: RwLock<Option<OnReceiveFn>>,
    on_new_connection: RwLock<Option<OnNewConnectionFn>>,
    on_changed_connections: RwLock<Option<OnChangedConnectionsFn>>,
    on_node_time_adjusted: RwLock<Option<OnNodeTimeAdjustedFn>>,
    on_dropped_connection: RwLock<Option<OnDroppedConnectionFn>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_receive(&self, f: OnReceiveFn) {
        *self.on_receive.write().unwrap() = Some(f);
    }

    pub fn set_on_new_connection(&self, f: OnNewConnectionFn) {
        *self.on_new_connection.write().unwrap() = Some(f);
    }

    pub fn set_on_changed_connections(&self, f: OnChangedConnectionsFn) {
        *self.on_changed_connections.write().unwrap() = Some(f);
    }

    pub fn set_on_node_time_adjusted(&self, f: OnNodeTimeAdjustedFn) {
        *self.on_node_time_adjusted.write().unwrap() = Some(f);
    }

    pub fn set_on_dropped_connection(&self, f: OnDroppedConnectionFn) {
        *self.on_dropped_connection.write().unwrap() = Some(f);
    }

    pub fn fire_on_receive(&self, from: NodeId, payload: &Value) {
        if let Some(f) = self.on_receive.read().unwrap().as_ref() {
            f(from, payload);
        }
    }

    pub fn fire_on_new_connection(&self, peer: NodeId) {
        if let Some(f) = self.on_new_connection.read().unwrap().as_ref() {
            f(peer);
        }
    }

    pub fn fire_on_changed_connections(&self) {
        if let Some(f) = self.on_changed_connections.read().unwrap().as_ref() {
            f();
        }
    }

    pub fn fire_on_node_time_adjusted(&self, offset_micros: i64) {
        if let Some(f) = self.on_node_time_adjusted.read().unwrap().as_ref() {
            f(offset_micros);
        }
    }

    pub fn fire_on_dropped_connection(&self, peer: NodeId) {
        if let Some(f) = self.on_dropped_connection.read().unwrap().as_ref() {
            f(peer);
        }
    }
}
