//! Per-Connection tunables (§6).

use serde::{Deserialize, Serialize};

/// Builder-style configuration for one [`crate::Connection`], following this
/// workspace's `max_*`/`*_timeout_ms` config-struct convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Silent-connection cutoff (§4.2 Liveness). Default 30 s.
    pub liveness_timeout_ms: u64,
    /// Wire message size cap (§3). Default 4 KiB.
    pub message_cap_bytes: usize,
    /// Consecutive framing/parse failures tolerated before the owning
    /// Router is told to consider closing the connection (§7 Framing/parse).
    pub max_consecutive_parse_errors: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 30_000,
            message_cap_bytes: mesh_core::DEFAULT_MESSAGE_CAP_BYTES,
            max_consecutive_parse_errors: 5,
        }
    }
}

impl ConnectionConfig {
    pub fn with_liveness_timeout_ms(mut self, ms: u64) -> Self {
        self.liveness_timeout_ms = ms;
        self
    }

    pub fn with_message_cap_bytes(mut self, cap: usize) -> Self {
        self.message_cap_bytes = cap;
        self
    }

    pub fn with_max_consecutive_parse_errors(mut self, n: u32) -> Self {
        self.max_consecutive_parse_errors = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.liveness_timeout_ms, 30_000);
        assert_eq!(cfg.message_cap_bytes, 4096);
    }
}
