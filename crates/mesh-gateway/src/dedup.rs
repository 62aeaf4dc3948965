use dashmap::DashMap;
use mesh_core::NodeId;

use crate::config::GatewayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MessageKey {
    origin: NodeId,
    message_id: u64,
}

/// Bounded, TTL-expiring record of `(messageId, originNode)` pairs the
/// primary has already forwarded, so a retransmitted `GatewayData` (the
/// mesh floods, so a primary may see the same request via more than one
/// path) is dropped rather than forwarded twice (§4.8, §9 decision 2).
/// Modeled on the source's custody-tracking map: a capacity-bounded
/// concurrent map keyed by identity, with an eviction sweep when full.
#[derive(Debug)]
pub struct DedupTable {
    window_micros: u64,
    max_entries: usize,
    entries: DashMap<MessageKey, u64>,
}

impl DedupTable {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            window_micros: config.dedup_window_ms * 1000,
            max_entries: config.max_tracked_messages,
            entries: DashMap::new(),
        }
    }

    /// `true` if this `(message_id, origin)` pair was already seen inside
    /// the dedup window; marks it seen either way so a retry is rejected
    /// going forward within the window.
    pub fn seen(&self, origin: NodeId, message_id: u64, now_micros: u64) -> bool {
        self.sweep_expired(now_micros);
        let key = MessageKey { origin, message_id };
        if let Some(expiry) = self.entries.get(&key) {
            if *expiry > now_micros {
                return true;
            }
        }
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(key, now_micros + self.window_micros);
        false
    }

    fn sweep_expired(&self, now_micros: u64) {
        self.entries.retain(|_, expiry| *expiry > now_micros);
    }

    fn evict_oldest(&self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| *entry.key())
        {
            self.entries.remove(&oldest_key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_is_not_a_duplicate() {
        let table = DedupTable::new(&GatewayConfig::default());
        assert!(!table.seen(NodeId::new(1), 42, 0));
    }

    #[test]
    fn repeat_within_window_is_a_duplicate() {
        let table = DedupTable::new(&GatewayConfig::default());
        assert!(!table.seen(NodeId::new(1), 42, 0));
        assert!(table.seen(NodeId::new(1), 42, 1_000));
    }

    #[test]
    fn repeat_past_window_is_not_a_duplicate() {
        let config = GatewayConfig::default().with_dedup_window_ms(100);
        let table = DedupTable::new(&config);
        assert!(!table.seen(NodeId::new(1), 42, 0));
        assert!(table.seen(NodeId::new(1), 42, 50_000));
        assert!(!table.seen(NodeId::new(1), 42, 200_000));
    }

    #[test]
    fn different_origin_is_not_a_duplicate() {
        let table = DedupTable::new(&GatewayConfig::default());
        assert!(!table.seen(NodeId::new(1), 42, 0));
        assert!(!table.seen(NodeId::new(2), 42, 0));
    }

    #[test]
    fn capacity_bound_is_respected_by_eviction() {
        let config = GatewayConfig::default().with_max_tracked_messages(4);
        let table = DedupTable::new(&config);
        for i in 0..10u64 {
            table.seen(NodeId::new(1), i, i * 1000);
        }
        assert!(table.len() <= 4);
    }
}
