use std::collections::HashMap;

use mesh_core::NodeId;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::payload::HeartbeatPayload;

#[derive(Debug, Clone)]
struct Candidate {
    rssi: i32,
    has_internet: bool,
    participates: bool,
    last_seen_micros: u64,
}

impl Candidate {
    fn eligible(&self) -> bool {
        self.has_internet && self.participates
    }
}

/// Tracks every gateway-capable peer's most recent heartbeat and decides who
/// is primary (§4.8). Eligibility is `hasInternet && participates`; among
/// eligible candidates the highest `routerRssi` wins, ties broken by the
/// highest `NodeId`. A short cooldown after a change in primary damps
/// flapping between two close RSSI values; an ineligible current primary is
/// replaced immediately regardless of cooldown.
#[derive(Debug)]
pub struct GatewayElection {
    config: GatewayConfig,
    candidates: HashMap<NodeId, Candidate>,
    current_primary: Option<NodeId>,
    cooldown_until_micros: u64,
}

impl GatewayElection {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            candidates: HashMap::new(),
            current_primary: None,
            cooldown_until_micros: 0,
        }
    }

    pub fn current_primary(&self) -> Option<NodeId> {
        self.current_primary
    }

    pub fn on_heartbeat(&mut self, from: NodeId, heartbeat: &HeartbeatPayload, now_micros: u64) {
        self.candidates.insert(
            from,
            Candidate {
                rssi: heartbeat.router_rssi,
                has_internet: heartbeat.has_internet,
                participates: heartbeat.participates,
                last_seen_micros: now_micros,
            },
        );
    }

    fn purge_stale(&mut self, now_micros: u64) {
        let timeout = self.config.failure_timeout_ms as u64 * 1000;
        self.candidates
            .retain(|_, c| now_micros.saturating_sub(c.last_seen_micros) <= timeout);
    }

    /// Re-run the election, folding in this node's own standing alongside
    /// whatever peers have heart-beaten recently. Returns the elected
    /// primary, if any node (including this one) is eligible.
    pub fn elect(
        &mut self,
        self_node: NodeId,
        self_rssi: i32,
        self_has_internet: bool,
        now_micros: u64,
    ) -> Option<NodeId> {
        self.purge_stale(now_micros);

        let self_participates = self.config.participate_in_election;
        let mut best: Option<(NodeId, i32)> = if self_has_internet && self_participates {
            Some((self_node, self_rssi))
        } else {
            None
        };
        for (&id, c) in &self.candidates {
            if !c.eligible() {
                continue;
            }
            best = Some(match best {
                None => (id, c.rssi),
                Some((best_id, best_rssi)) => {
                    if c.rssi > best_rssi || (c.rssi == best_rssi && id > best_id) {
                        (id, c.rssi)
                    } else {
                        (best_id, best_rssi)
                    }
                }
            });
        }
        let winner = best.map(|(id, _)| id);

        let current_still_eligible = self.current_primary.is_some_and(|cur| {
            cur == self_node && self_has_internet && self_participates
                || self.candidates.get(&cur).is_some_and(Candidate::eligible)
        });

        if self.current_primary.is_some() && current_still_eligible && now_micros < self.cooldown_until_micros {
            debug!("election cooldown active, keeping current primary");
            return self.current_primary;
        }

        if winner != self.current_primary {
            info!(?winner, previous = ?self.current_primary, "gateway primary changed");
            self.current_primary = winner;
            self.cooldown_until_micros = now_micros + self.config.election_cooldown_ms as u64 * 1000;
        }
        self.current_primary
    }

    pub fn is_primary(&self, node: NodeId) -> bool {
        self.current_primary == Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hb(rssi: i32, has_internet: bool, participates: bool) -> HeartbeatPayload {
        HeartbeatPayload {
            is_primary: false,
            has_internet,
            router_rssi: rssi,
            uptime_ms: 0,
            participates,
        }
    }

    #[test]
    fn highest_rssi_wins() {
        let mut election = GatewayElection::new(GatewayConfig::default());
        election.on_heartbeat(NodeId::new(2), &hb(-40, true, true), 0);
        election.on_heartbeat(NodeId::new(3), &hb(-80, true, true), 0);
        let winner = election.elect(NodeId::new(1), -90, true, 0);
        assert_eq!(winner, Some(NodeId::new(2)));
    }

    #[test]
    fn tie_breaks_on_highest_node_id() {
        let mut election = GatewayElection::new(GatewayConfig::default());
        election.on_heartbeat(NodeId::new(5), &hb(-40, true, true), 0);
        let winner = election.elect(NodeId::new(9), -40, true, 0);
        assert_eq!(winner, Some(NodeId::new(9)));
    }

    #[test]
    fn non_participating_node_never_wins() {
        let mut election = GatewayElection::new(GatewayConfig::default());
        election.on_heartbeat(NodeId::new(2), &hb(0, true, false), 0);
        let winner = election.elect(NodeId::new(9), -90, true, 0);
        assert_eq!(winner, Some(NodeId::new(9)));
    }

    #[test]
    fn stale_candidates_are_purged_and_stop_winning() {
        let config = GatewayConfig::default().with_failure_timeout_ms(1_000);
        let mut election = GatewayElection::new(config);
        election.on_heartbeat(NodeId::new(2), &hb(100, true, true), 0);
        let winner = election.elect(NodeId::new(1), -90, false, 0);
        assert_eq!(winner, Some(NodeId::new(2)));

        // well past the failure timeout and past cooldown
        let winner = election.elect(NodeId::new(1), -90, false, 20_000_000);
        assert_eq!(winner, None);
    }

    #[test]
    fn cooldown_holds_the_primary_through_a_transient_rssi_dip() {
        let config = GatewayConfig::default().with_election_cooldown_ms(10_000);
        let mut election = GatewayElection::new(config);
        election.on_heartbeat(NodeId::new(2), &hb(-30, true, true), 0);
        assert_eq!(election.elect(NodeId::new(1), -90, true, 0), Some(NodeId::new(2)));

        // A new, momentarily stronger peer shows up inside the cooldown window.
        election.on_heartbeat(NodeId::new(3), &hb(-10, true, true), 1_000);
        assert_eq!(
            election.elect(NodeId::new(1), -90, true, 1_000),
            Some(NodeId::new(2)),
            "cooldown should keep the existing primary"
        );

        // After cooldown expires the stronger peer takes over.
        assert_eq!(
            election.elect(NodeId::new(1), -90, true, 11_000_000),
            Some(NodeId::new(3))
        );
    }

    #[test]
    fn ineligible_primary_is_replaced_even_during_cooldown() {
        let config = GatewayConfig::default().with_election_cooldown_ms(60_000);
        let mut election = GatewayElection::new(config);
        election.on_heartbeat(NodeId::new(2), &hb(-30, true, true), 0);
        election.on_heartbeat(NodeId::new(3), &hb(-50, true, true), 0);
        assert_eq!(election.elect(NodeId::new(1), -90, true, 0), Some(NodeId::new(2)));

        // Node 2 loses Internet.
        election.on_heartbeat(NodeId::new(2), &hb(-30, false, true), 1_000);
        assert_eq!(election.elect(NodeId::new(1), -90, true, 1_000), Some(NodeId::new(3)));
    }
}
