//! Replica node configuration.

use alder_gossip::GossipConfig;
use alder_quorum::QuorumConfig;

/// Tunables for one replica node.
///
/// Constructed once and handed to [`crate::Replica::new`]; reconfiguring
/// means building a new value.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Coordination-free executor tunables
    pub gossip: GossipConfig,
    /// Consensus executor tunables
    pub quorum: QuorumConfig,
    /// Terminal commit records retained for inspection before the oldest
    /// are dropped
    pub archive_capacity: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            gossip: GossipConfig::default(),
            quorum: QuorumConfig::default(),
            archive_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_compose_the_layer_defaults() {
        let config = ReplicaConfig::default();
        assert_eq!(config.gossip.max_ops_per_peer, GossipConfig::default().max_ops_per_peer);
        assert_eq!(config.quorum.max_rounds, QuorumConfig::default().max_rounds);
        assert!(config.archive_capacity > 0);
    }
}
