use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Seam over "can this node currently reach the Internet". A real node
/// probes a well-known host:port over TCP; tests substitute a scripted
/// sequence of outcomes.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<Duration, GatewayError>;
}

/// TCP-connect reachability probe (§4.8): a bare connect to `host:port`,
/// timed, with no data exchanged. Mirrors the source's "open a socket to a
/// known host" health check rather than anything protocol-specific.
#[derive(Debug, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<Duration, GatewayError> {
        let started = std::time::Instant::now();
        let connect = tokio::net::TcpStream::connect((host, port));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(_stream)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(GatewayError::Probe(e.to_string())),
            Err(_) => Err(GatewayError::ProbeTimeout),
        }
    }
}

/// Running reachability state (§4.8): a rolling view of whether this node
/// currently has Internet access, fed by periodic probes.
#[derive(Debug, Clone)]
pub struct InternetHealth {
    available: bool,
    checks: u64,
    successes: u64,
    failures: u64,
    last_latency: Option<Duration>,
    last_error: Option<String>,
    last_success_micros: Option<u64>,
}

impl Default for InternetHealth {
    fn default() -> Self {
        Self {
            available: false,
            checks: 0,
            successes: 0,
            failures: 0,
            last_latency: None,
            last_error: None,
            last_success_micros: None,
        }
    }
}

impl InternetHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn checks(&self) -> u64 {
        self.checks
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_success_micros(&self) -> Option<u64> {
        self.last_success_micros
    }

    /// Run one probe and fold the result into the running state. A single
    /// failed probe flips `available` false immediately; the source treats
    /// reachability as binary per-check rather than debounced.
    pub async fn check<P: Prober>(
        &mut self,
        prober: &P,
        host: &str,
        port: u16,
        timeout: Duration,
        now_micros: u64,
    ) {
        self.checks += 1;
        match prober.probe(host, port, timeout).await {
            Ok(latency) => {
                debug!(?latency, "internet reachability check succeeded");
                self.available = true;
                self.successes += 1;
                self.last_latency = Some(latency);
                self.last_error = None;
                self.last_success_micros = Some(now_micros);
            }
            Err(e) => {
                warn!(error = %e, "internet reachability check failed");
                self.available = false;
                self.failures += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedProber {
        outcomes: Mutex<std::collections::VecDeque<Result<Duration, GatewayError>>>,
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<Duration, GatewayError> {
            self.outcomes.lock().unwrap().pop_front().expect("scripted outcome")
        }
    }

    #[tokio::test]
    async fn success_marks_available_and_records_latency() {
        let prober = ScriptedProber {
            outcomes: Mutex::new(vec![Ok(Duration::from_millis(12))].into()),
        };
        let mut health = InternetHealth::new();
        health.check(&prober, "8.8.8.8", 53, Duration::from_secs(1), 100).await;
        assert!(health.available());
        assert_eq!(health.successes(), 1);
        assert_eq!(health.last_success_micros(), Some(100));
    }

    #[tokio::test]
    async fn failure_marks_unavailable() {
        let prober = ScriptedProber {
            outcomes: Mutex::new(
                vec![Ok(Duration::from_millis(1)), Err(GatewayError::ProbeTimeout)].into(),
            ),
        };
        let mut health = InternetHealth::new();
        health.check(&prober, "8.8.8.8", 53, Duration::from_secs(1), 0).await;
        assert!(health.available());
        health.check(&prober, "8.8.8.8", 53, Duration::from_secs(1), 1).await;
        assert!(!health.available());
        assert_eq!(health.checks(), 2);
        assert_eq!(health.failures(), 1);
        // last success sticks from the earlier check.
        assert_eq!(health.last_success_micros(), Some(0));
    }
}
