//! OTA error taxonomy (§7: integrity and stall are recoverable, never fatal).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("assembled image md5 {actual} does not match announced md5 {expected}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("chunk {part_no} out of range (noPart={no_part})")]
    ChunkOutOfRange { part_no: u32, no_part: u32 },

    #[error("no active download in progress")]
    NoActiveDownload,

    #[error("chunk loader failed for part {part_no}: {reason}")]
    ChunkLoad { part_no: u32, reason: String },

    #[error("invalid base64 chunk payload: {0}")]
    InvalidChunkEncoding(#[from] base64::DecodeError),

    #[error("persistence backend failed: {0}")]
    Persistence(String),

    #[error("failed to decompress assembled image: {0}")]
    Decompression(String),
}
