use tracing::warn;

use crate::error::BufferError;

/// Default size cap matching the wire message cap (§3): a Buffer exceeding
/// this many un-terminated bytes resets rather than accumulating forever.
pub const DEFAULT_CAP_BYTES: usize = 4096;

/// Resumable `\0`-delimited frame decoder (§4.1).
///
/// Feed it bytes as they arrive, in any chunking; it yields each complete
/// message body (the JSON between two `\0`s) as soon as the terminator
/// shows up, in order. Empty runs between consecutive `\0`s are discarded
/// silently, matching the source's handling of stray delimiters.
#[derive(Debug)]
pub struct Buffer {
    current: Vec<u8>,
    cap: usize,
}

impl Buffer {
    pub fn new(cap: usize) -> Self {
        Self {
            current: Vec::new(),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Feed a chunk of bytes, returning every frame result produced by this
    /// chunk in order. A successful `Ok(body)` per completed message; an
    /// `Err` per oversize run (the buffer has already reset itself by the
    /// time the error is returned, so feeding can continue immediately).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Vec<u8>, BufferError>> {
        let mut out = Vec::new();
        for &b in bytes {
            if b == 0 {
                if !self.current.is_empty() {
                    out.push(Ok(std::mem::take(&mut self.current)));
                }
                // Leading/trailing `\0` runs collapse to nothing.
                continue;
            }
            self.current.push(b);
            if self.current.len() > self.cap {
                let accumulated = self.current.len();
                self.current.clear();
                warn!(accumulated, cap = self.cap, "buffer oversize, resetting");
                out.push(Err(BufferError::Oversize {
                    accumulated,
                    cap: self.cap,
                }));
            }
        }
        out
    }

    /// Bytes currently accumulated but not yet terminated by a `\0`.
    pub fn pending_len(&self) -> usize {
        self.current.len()
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAP_BYTES)
    }
}

/// Frame one message body for the wire: `\0` + `body` + `\0`.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(0u8);
    out.extend_from_slice(body);
    out.push(0u8);
    out
}
