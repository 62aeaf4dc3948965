use std::time::Duration;

/// Tunables for the gateway layer (§4.8, §6). Defaults follow the source's
/// defaults where the spec names one; fields the spec leaves
/// implementation-defined are called out below.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub internet_check_interval_ms: u64,
    pub internet_check_host: String,
    pub internet_check_port: u16,
    /// Implementation-defined: how long a single reachability probe may run
    /// before it counts as a failure.
    pub probe_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub failure_timeout_ms: u64,
    pub dedup_window_ms: u64,
    pub max_tracked_messages: usize,
    pub participate_in_election: bool,
    /// Implementation-defined: minimum time between two elections flipping
    /// the primary, to damp flapping when RSSI values are close.
    pub election_cooldown_ms: u64,
    /// Implementation-defined: how long `sendToInternet` waits for a
    /// `GatewayAck` before calling back with `ack-timeout`.
    pub ack_timeout_ms: u64,
    /// Implementation-defined: outbound HTTP requests in flight at once.
    pub max_concurrent_http: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            internet_check_interval_ms: 30_000,
            internet_check_host: "8.8.8.8".to_string(),
            internet_check_port: 53,
            probe_timeout_ms: 5_000,
            heartbeat_interval_ms: 15_000,
            failure_timeout_ms: 45_000,
            dedup_window_ms: 60_000,
            max_tracked_messages: 500,
            participate_in_election: true,
            election_cooldown_ms: 5_000,
            ack_timeout_ms: 30_000,
            max_concurrent_http: 4,
        }
    }
}

impl GatewayConfig {
    pub fn with_internet_check_interval_ms(mut self, ms: u64) -> Self {
        self.internet_check_interval_ms = ms;
        self
    }

    pub fn with_internet_check_target(mut self, host: impl Into<String>, port: u16) -> Self {
        self.internet_check_host = host.into();
        self.internet_check_port = port;
        self
    }

    pub fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_failure_timeout_ms(mut self, ms: u64) -> Self {
        self.failure_timeout_ms = ms;
        self
    }

    pub fn with_dedup_window_ms(mut self, ms: u64) -> Self {
        self.dedup_window_ms = ms;
        self
    }

    pub fn with_max_tracked_messages(mut self, n: usize) -> Self {
        self.max_tracked_messages = n;
        self
    }

    pub fn with_participate_in_election(mut self, participate: bool) -> Self {
        self.participate_in_election = participate;
        self
    }

    pub fn with_election_cooldown_ms(mut self, ms: u64) -> Self {
        self.election_cooldown_ms = ms;
        self
    }

    pub fn with_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    pub fn with_max_concurrent_http(mut self, n: usize) -> Self {
        self.max_concurrent_http = n;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
