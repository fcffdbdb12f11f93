//! Wire format for inter-replica messages.
//!
//! Every payload travels inside a versioned [`Envelope`]; replicas refuse
//! envelopes whose schema version they do not speak, so incompatible
//! peers fail loudly instead of misinterpreting bytes.

use crate::descriptor::OperationDescriptor;
use crate::errors::{AlderError, AlderResult};
use crate::hash::Digest32;
use crate::identifiers::{Key, OperationId, ReplicaId};
use crate::record::CommittedDecision;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Wire schema version. Bump on any breaking change to message shapes.
pub const SCHEMA_VERSION: u16 = 1;

/// An operation as replicated between peers.
///
/// Both kinds are idempotent to re-deliver: free operations dedup by id,
/// decisions dedup by committed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicatedOp {
    /// A coordination-free mutation, applied wherever it arrives
    Free(OperationDescriptor),
    /// An agreed decision, applied at its committed position
    Decision(CommittedDecision),
}

impl ReplicatedOp {
    /// Id of the underlying operation.
    pub fn id(&self) -> OperationId {
        match self {
            Self::Free(descriptor) => descriptor.id,
            Self::Decision(decision) => decision.operation,
        }
    }

    /// Key the operation addresses.
    pub fn key(&self) -> &Key {
        match self {
            Self::Free(descriptor) => &descriptor.key,
            Self::Decision(decision) => &decision.key,
        }
    }
}

/// Digest of a replica's replicated-operation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDigest {
    /// Ids of operations in the sender's log window
    pub ops: BTreeSet<OperationId>,
    /// Per-key state checksums at digest time
    pub checksums: BTreeMap<Key, Digest32>,
}

/// Messages exchanged between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Eager push of one replicated operation
    Gossip {
        /// The operation being disseminated
        op: ReplicatedOp,
    },
    /// Acknowledges application of a disseminated operation
    GossipAck {
        /// Operation the receiver applied (or already had)
        operation: OperationId,
    },
    /// Periodic anti-entropy digest
    SyncDigest {
        /// The sender's log and state summary
        digest: OpDigest,
    },
    /// Request for operations missing from the sender's log
    SyncPull {
        /// Ids the sender wants
        missing: Vec<OperationId>,
    },
    /// Operations answering a pull or pushed after a digest gap
    SyncOps {
        /// The operations themselves
        ops: Vec<ReplicatedOp>,
    },
    /// Coordinator's proposal for one position in a key's order
    Propose {
        /// Attempt number within this position, starting at 1
        round: u32,
        /// The resolved decision up for a vote
        decision: CommittedDecision,
    },
    /// Acceptor's vote for a proposal
    Accept {
        /// Attempt the vote answers
        round: u32,
        /// Key the proposal extends
        key: Key,
        /// Position the proposal fills
        seq: u64,
        /// Operation the vote is for
        operation: OperationId,
    },
    /// Commit broadcast once a quorum accepted
    Commit {
        /// Attempt that reached quorum
        round: u32,
        /// The agreed decision
        decision: CommittedDecision,
    },
    /// Hands an operation to its key's coordinator
    Forward {
        /// The operation to propose
        operation: OperationDescriptor,
    },
    /// Coordinator's failure report back to the origin replica
    Reject {
        /// Operation that failed
        operation: OperationId,
        /// Why it failed
        error: AlderError,
    },
}

/// Envelope carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Schema version the sender speaks
    pub version: u16,
    /// Sending replica
    pub from: ReplicaId,
    /// The message itself
    pub message: WireMessage,
}

impl Envelope {
    /// Wrap a message under the current schema version.
    pub fn new(from: ReplicaId, message: WireMessage) -> Self {
        Self {
            version: SCHEMA_VERSION,
            from,
            message,
        }
    }

    /// Serialize for the transport.
    pub fn encode(&self) -> AlderResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| AlderError::serialization(e.to_string()))
    }

    /// Deserialize from the transport, refusing unknown schema versions.
    pub fn decode(bytes: &[u8]) -> AlderResult<Self> {
        let envelope: Self =
            bincode::deserialize(bytes).map_err(|e| AlderError::serialization(e.to_string()))?;
        if envelope.version != SCHEMA_VERSION {
            return Err(AlderError::invalid(format!(
                "unsupported schema version {}, this replica speaks {SCHEMA_VERSION}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
