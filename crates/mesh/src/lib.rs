//! # mesh
//!
//! Top-level façade that assembles routing, time sync, OTA, and gateway into
//! one running node: owns the tokio connection tasks and scheduler ticks that
//! turn the pure state machines in `mesh-routing`/`mesh-timesync`/`mesh-ota`/
//! `mesh-gateway` into a live mesh participant over TCP (§5, §6).

mod callbacks;
mod config;
mod error;
mod facade;

pub use callbacks::{
    Callbacks, OnChangedConnectionsFn, OnDroppedConnectionFn, OnNewConnectionFn,
    OnNodeTimeAdjustedFn, OnReceiveFn,
};
pub use config::{NodeConfig, DEFAULT_NODE_SYNC_INTERVAL_MS, DEFAULT_PORT};
pub use error::{MeshError, MeshResult};
pub use facade::Mesh;
