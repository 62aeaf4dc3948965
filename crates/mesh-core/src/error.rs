//! Error building blocks shared by the mesh crates.
//!
//! Each subsystem crate defines its own `thiserror`-derived error enum; this
//! module holds the handful of error shapes that are genuinely shared (wire
//! decode failures, transport failures) so every crate that touches the wire
//! format doesn't redefine them.

use thiserror::Error;

use crate::NodeId;

/// Errors decoding or validating a wire [`crate::message::Message`].
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message exceeds size cap of {cap} bytes ({actual} bytes)")]
    TooLarge { cap: usize, actual: usize },

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),

    #[error("message for node {expected} was handed to node {actual}")]
    WrongRecipient { expected: NodeId, actual: NodeId },
}

/// Errors from the [`crate::transport::Transport`] seam.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,
}
