//! # mesh-connection
//!
//! The per-peer session state machine of §4.2: framing via `mesh-buffer`,
//! handshake, liveness, and per-connection subtree bookkeeping. `Connection`
//! is a pure value — see [`connection`] module docs for why it carries no
//! back-pointer to its owning Router.

mod config;
mod connection;
mod error;

pub use config::ConnectionConfig;
pub use connection::{CloseReason, Connection, ConnectionEvent, ConnectionId, ConnectionState};
pub use error::ConnectionError;
