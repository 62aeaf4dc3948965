//! # mesh-core
//!
//! Shared building blocks for the painlessmesh-rs workspace: the [`NodeId`]
//! and [`MeshClock`] primitives (§3), the wire [`Message`] tagged union
//! (§3/§6), shared error types (§7), and the [`Transport`] seam the WiFi
//! driver would otherwise fill (§6).
//!
//! Every other crate in this workspace (`mesh-buffer`, `mesh-connection`,
//! `mesh-routing`, `mesh-timesync`, `mesh-plugin`, `mesh-ota`,
//! `mesh-gateway`, `mesh`) depends on this one; it depends on nothing else
//! in the workspace.

pub mod error;
pub mod mesh_time;
pub mod message;
pub mod node_id;
pub mod transport;

pub use error::{MessageError, TransportError};
pub use mesh_time::{Clock, MeshClock, MeshTimestamp, SystemClock, VirtualClock};
pub use message::{
    Message, OtaAnnouncePayload, OtaTransferPayload, TimeSyncBody, TimeSyncPhase,
    DEFAULT_MESSAGE_CAP_BYTES, TYPE_BROADCAST, TYPE_NODE_SYNC, TYPE_NODE_SYNC_REPLY,
    TYPE_NODE_SYNC_REQUEST, TYPE_OTA_ANNOUNCE, TYPE_OTA_TRANSFER, TYPE_SINGLE, TYPE_TIME_DELAY,
    TYPE_TIME_SYNC, TYPE_USER_MIN,
};
pub use node_id::NodeId;
pub use transport::{
    MockReadHalf, MockTransport, MockWriteHalf, TcpReadHalf, TcpTransport, TcpWriteHalf, Transport,
    TransportReader, TransportWriter,
};
