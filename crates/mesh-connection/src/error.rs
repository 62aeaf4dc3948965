//! Connection error taxonomy (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("buffer error: {0}")]
    Buffer(#[from] mesh_buffer::BufferError),

    #[error("message decode error: {0}")]
    Message(#[from] mesh_core::MessageError),

    #[error("connection already closed")]
    AlreadyClosed,
}
