//! Unified error type for Alder operations.
//!
//! One enum covers the whole workspace. Coordination failures that callers
//! are expected to handle (quorum timeouts, partition blocks, escrow
//! exhaustion) get dedicated variants; everything else carries a message.

use crate::identifiers::Key;
use serde::{Deserialize, Serialize};

/// Unified error type for all Alder operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AlderError {
    /// Invalid input, configuration, or slot-kind mismatch
    #[error("Invalid: {message}")]
    Invalid {
        /// What was invalid
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// Serialization or deserialization failure
    #[error("Serialization error: {message}")]
    Serialization {
        /// What failed to (de)serialize
        message: String,
    },

    /// Transport-level failure
    #[error("Transport error: {message}")]
    Transport {
        /// What the transport reported
        message: String,
    },

    /// Local backpressure: too much work already in flight
    #[error("Busy: {message}")]
    Busy {
        /// What is saturated
        message: String,
    },

    /// Replicas with identical operation histories disagree on state.
    ///
    /// Fatal for the affected key: its coordination-free path stays
    /// disabled until an operator intervenes.
    #[error("Convergence violation on key '{key}'")]
    ConvergenceViolation {
        /// Key whose replicas diverged
        key: Key,
    },

    /// A consensus round could not gather a quorum within its deadline
    #[error("Quorum timeout on key '{key}' after {attempts} attempts")]
    QuorumTimeout {
        /// Key whose round timed out
        key: Key,
        /// Rounds attempted before giving up
        attempts: u32,
    },

    /// Too few replicas reachable to form a quorum
    #[error("Partition blocked: {reachable} replicas reachable, quorum is {quorum}")]
    PartitionBlocked {
        /// Replicas currently reachable, including the local one
        reachable: usize,
        /// Votes required to commit
        quorum: usize,
    },

    /// This replica's escrow allocation for a bounded counter is spent
    #[error("Escrow exhausted on key '{key}'")]
    EscrowExhausted {
        /// Key whose escrow share ran out
        key: Key,
    },

    /// The caller withdrew the operation before a quorum accepted it
    #[error("Cancelled: {message}")]
    Cancelled {
        /// What was withdrawn
        message: String,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },
}

impl AlderError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a backpressure error
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Create a convergence violation error
    pub fn convergence_violation(key: Key) -> Self {
        Self::ConvergenceViolation { key }
    }

    /// Create a quorum timeout error
    pub fn quorum_timeout(key: Key, attempts: u32) -> Self {
        Self::QuorumTimeout { key, attempts }
    }

    /// Create a partition blocked error
    pub fn partition_blocked(reachable: usize, quorum: usize) -> Self {
        Self::PartitionBlocked { reachable, quorum }
    }

    /// Create an escrow exhausted error
    pub fn escrow_exhausted(key: Key) -> Self {
        Self::EscrowExhausted { key }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same submission can ever succeed.
    ///
    /// Quorum timeouts and partition blocks clear when connectivity
    /// returns; the rest need a changed request or operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuorumTimeout { .. }
                | Self::PartitionBlocked { .. }
                | Self::Transport { .. }
                | Self::Busy { .. }
        )
    }
}

/// Result alias used throughout the workspace.
pub type AlderResult<T> = Result<T, AlderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = AlderError::quorum_timeout(Key::from("inv:1"), 3);
        assert_eq!(err.to_string(), "Quorum timeout on key 'inv:1' after 3 attempts");

        let err = AlderError::partition_blocked(2, 3);
        assert_eq!(
            err.to_string(),
            "Partition blocked: 2 replicas reachable, quorum is 3"
        );
    }

    #[test]
    fn retryability_split() {
        assert!(AlderError::partition_blocked(1, 2).is_retryable());
        assert!(AlderError::quorum_timeout(Key::from("k"), 1).is_retryable());
        assert!(AlderError::busy("dissemination queue full").is_retryable());
        assert!(!AlderError::convergence_violation(Key::from("k")).is_retryable());
        assert!(!AlderError::escrow_exhausted(Key::from("k")).is_retryable());
        assert!(!AlderError::invalid("bad").is_retryable());
    }

    #[test]
    fn errors_round_trip_through_serde() {
        let err = AlderError::convergence_violation(Key::from("cart:7"));
        let json = serde_json::to_string(&err).expect("serialize");
        let back: AlderError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err, back);
    }
}
