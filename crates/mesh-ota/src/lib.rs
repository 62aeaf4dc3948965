//! Chunked over-the-air firmware distribution (§4.7): announce/request/data
//! state machines for sender and receiver, md5 integrity verification, and
//! the dual unicast/broadcast distribution modes.

mod config;
mod digest;
mod error;
mod firmware;
mod persistence;
mod receiver;
mod sender;

pub use config::{OtaConfig, DEFAULT_ANNOUNCE_INTERVAL_MS, DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_STALL_TIMEOUT_MS};
pub use digest::md5_hex;
pub use error::OtaError;
pub use firmware::{ChunkBitmap, FirmwareId};
pub use persistence::{InMemoryOtaStore, OtaReceiverSnapshot, OtaStore};
pub use receiver::{OtaAction, OtaReceiver, OtaReceiverState};
pub use sender::{ChunkSource, InMemoryChunkSource, OtaSender};
