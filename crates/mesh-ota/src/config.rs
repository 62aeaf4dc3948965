//! OTA tunables (§6 defaults).

pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 1024;
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 60_000;
/// Not fixed by §6; a receiver in broadcast mode falls back to unicast
/// DataRequest after this much silence on the expected chunk stream (§4.7
/// Failure semantics).
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaConfig {
    pub chunk_size_bytes: usize,
    pub announce_interval_ms: u64,
    pub stall_timeout_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            announce_interval_ms: DEFAULT_ANNOUNCE_INTERVAL_MS,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
        }
    }
}

impl OtaConfig {
    pub fn with_chunk_size_bytes(mut self, chunk_size_bytes: usize) -> Self {
        self.chunk_size_bytes = chunk_size_bytes;
        self
    }

    pub fn with_announce_interval_ms(mut self, announce_interval_ms: u64) -> Self {
        self.announce_interval_ms = announce_interval_ms;
        self
    }

    pub fn with_stall_timeout_ms(mut self, stall_timeout_ms: u64) -> Self {
        self.stall_timeout_ms = stall_timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = OtaConfig::default();
        assert_eq!(config.chunk_size_bytes, 1024);
        assert_eq!(config.announce_interval_ms, 60_000);
    }

    #[test]
    fn builder_overrides_individually() {
        let config = OtaConfig::default().with_chunk_size_bytes(512);
        assert_eq!(config.chunk_size_bytes, 512);
        assert_eq!(config.announce_interval_ms, 60_000);
    }
}
