//! Aggregated façade error (§7, §10.3). Every subsystem crate keeps its own
//! `thiserror`-derived error enum; `MeshError` wraps each with `#[from]` so
//! callers of `Mesh` match on one type instead of reaching into subsystem
//! internals.

use mesh_core::{MessageError, TransportError};
use mesh_connection::ConnectionError;
use mesh_gateway::GatewayError;
use mesh_ota::OtaError;
use mesh_routing::RoutingError;
use mesh_timesync::TimeSyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("time sync error: {0}")]
    TimeSync(#[from] TimeSyncError),

    #[error("ota error: {0}")]
    Ota(#[from] OtaError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no connection with id {0}")]
    UnknownConnection(mesh_connection::ConnectionId),

    #[error("gateway subsystem is not configured for this node")]
    GatewayNotConfigured,

    #[error("mesh is already shut down")]
    AlreadyShutDown,

    #[error("mesh scheduler is already running")]
    AlreadyStarted,
}

pub type MeshResult<T> = Result<T, MeshError>;
