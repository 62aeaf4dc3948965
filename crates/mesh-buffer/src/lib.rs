//! # mesh-buffer
//!
//! Frames a JSON message on a byte stream per §4.1: each message on the wire
//! is `\0` + UTF-8 JSON + `\0`. [`Buffer`] accumulates arbitrarily-chunked
//! bytes and emits complete message bodies as they become available.

mod buffer;
mod error;

pub use buffer::{frame, Buffer, DEFAULT_CAP_BYTES};
pub use error::BufferError;
