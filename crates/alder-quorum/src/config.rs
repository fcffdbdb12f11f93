//! Tunables for quorum rounds.

use std::time::Duration;

/// Configuration for the consensus executor.
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// How long a proposal waits for its quorum before reverting
    pub round_timeout: Duration,
    /// Proposal attempts per operation before surfacing a timeout
    pub max_rounds: u32,
    /// Base delay before a reverted operation is reproposed
    pub backoff_base: Duration,
    /// Cap on the re-proposal delay
    pub backoff_max: Duration,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_millis(250),
            max_rounds: 3,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(2),
        }
    }
}

impl QuorumConfig {
    /// Delay before attempt `attempt` is proposed, growing exponentially
    /// up to the cap. Jitter is the caller's business.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.backoff_base * 2u32.saturating_pow(attempt.min(16));
        exponential.min(self.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = QuorumConfig {
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(100),
            ..QuorumConfig::default()
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(20));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(40));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(80));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(40), Duration::from_millis(100));
    }
}
