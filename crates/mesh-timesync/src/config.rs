//! Periodic scheduling parameters for time sync (§4.5, §6 defaults).

use rand::Rng;

/// Default period between a non-root node's self-initiated sync rounds:
/// 10 minutes.
pub const DEFAULT_INTERVAL_MS: u64 = 10 * 60 * 1_000;

/// Default symmetric jitter applied to the interval, to avoid every node in
/// a tree beating in lockstep.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSyncConfig {
    pub interval_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
        }
    }
}

impl TimeSyncConfig {
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    /// One concrete interval in microseconds, jittered by ±`jitter_fraction`.
    /// The caller supplies the RNG so scheduling stays deterministic in tests.
    pub fn jittered_interval_micros(&self, rng: &mut impl Rng) -> u64 {
        let base_micros = self.interval_ms as f64 * 1_000.0;
        let factor = 1.0 + rng.random_range(-self.jitter_fraction..=self.jitter_fraction);
        (base_micros * factor).max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_interval_is_ten_minutes() {
        let config = TimeSyncConfig::default();
        assert_eq!(config.interval_ms, 600_000);
    }

    #[test]
    fn jittered_interval_stays_within_bounds() {
        let config = TimeSyncConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let base_micros = config.interval_ms * 1_000;
        let low = (base_micros as f64 * (1.0 - config.jitter_fraction)) as u64;
        let high = (base_micros as f64 * (1.0 + config.jitter_fraction)) as u64;
        for _ in 0..100 {
            let interval = config.jittered_interval_micros(&mut rng);
            assert!(interval >= low && interval <= high, "{interval} out of [{low},{high}]");
        }
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = TimeSyncConfig::default()
            .with_interval_ms(1_000)
            .with_jitter_fraction(0.0);
        assert_eq!(config.interval_ms, 1_000);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(config.jittered_interval_micros(&mut rng), 1_000_000);
    }
}
