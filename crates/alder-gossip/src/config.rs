//! Tunables for dissemination and anti-entropy.

use std::time::Duration;

/// Configuration for the coordination-free executor.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Maximum operations pushed to a peer per dissemination burst
    pub max_ops_per_peer: usize,
    /// Maximum operations awaiting peer acknowledgement before
    /// submission is refused with a retryable error
    pub max_in_flight: usize,
    /// Maximum oplog entries retained for anti-entropy repair
    pub max_oplog_entries: usize,
    /// Interval between anti-entropy digest exchanges
    pub sync_interval: Duration,
    /// Maximum operations returned in a single sync response
    pub max_ops_per_sync: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            max_ops_per_peer: 100,
            max_in_flight: 1000,
            max_oplog_entries: 10_000,
            sync_interval: Duration::from_millis(500),
            max_ops_per_sync: 256,
        }
    }
}
