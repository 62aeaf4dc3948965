//! Internet reachability, primary-gateway election, and HTTP forwarding for
//! nodes that expose the mesh to the outside world (§4.8). Optional: a mesh
//! with no gateway-capable nodes never constructs any of these types.

mod client;
mod config;
mod dedup;
mod election;
mod error;
mod forwarder;
mod health;
mod payload;

pub use client::{GatewayCallback, GatewayClient, GatewaySendResult};
pub use config::GatewayConfig;
pub use dedup::DedupTable;
pub use election::GatewayElection;
pub use error::GatewayError;
pub use forwarder::{GatewayForwarder, HttpSender, ReqwestSender};
pub use health::{InternetHealth, Prober, TcpProber};
pub use payload::{
    GatewayAckPayload, GatewayDataPayload, GatewayPriority, HeartbeatPayload, TYPE_GATEWAY_ACK,
    TYPE_GATEWAY_DATA, TYPE_GATEWAY_HEARTBEAT,
};
