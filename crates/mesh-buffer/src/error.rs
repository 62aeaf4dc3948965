//! Buffer error taxonomy (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    /// Accumulated, un-terminated bytes exceeded the cap (§4.1 Failures).
    /// The buffer has already been reset; the caller decides whether to
    /// close the owning Connection.
    #[error("buffer accumulated {accumulated} bytes without a terminator, exceeding cap {cap}")]
    Oversize { accumulated: usize, cap: usize },
}
