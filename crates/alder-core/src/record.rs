//! Commit records: per-operation execution state.
//!
//! Every submitted operation gets a record tracking it from submission to
//! its terminal `Committed` state. The two execution paths have different
//! phase chains; a record never switches paths and never leaves
//! `Committed` once it gets there.

use crate::descriptor::{Mutation, OperationClass, SlotKind};
use crate::errors::{AlderError, AlderResult};
use crate::identifiers::{Key, OperationId, ReplicaId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of an operation on the coordination-free path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreePhase {
    /// Applied to the local replica, dissemination not yet started
    LocallyApplied,
    /// Dissemination in flight
    Propagating,
    /// Acknowledged by every replica reachable at completion time
    Committed,
}

/// Phases of an operation on the consensus path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusPhase {
    /// Waiting for its round to start (or reverted after a timeout)
    Pending,
    /// Proposal sent, votes outstanding
    Proposed,
    /// Quorum reached, commit broadcast outstanding
    Accepted,
    /// Agreed and applied
    Committed,
}

/// Execution state of one operation, tagged by path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    /// On the coordination-free path
    Free(FreePhase),
    /// On the consensus path
    Consensus(ConsensusPhase),
}

impl RecordState {
    /// Whether this state is terminal.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            Self::Free(FreePhase::Committed) | Self::Consensus(ConsensusPhase::Committed)
        )
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free(phase) => write!(f, "free/{phase:?}"),
            Self::Consensus(phase) => write!(f, "consensus/{phase:?}"),
        }
    }
}

/// Tracks one operation from submission to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Operation being tracked
    pub operation: OperationId,
    /// Key the operation addresses
    pub key: Key,
    /// Class the operation routed under
    pub class: OperationClass,
    /// Current execution state
    pub state: RecordState,
}

impl CommitRecord {
    /// Record for an operation entering the coordination-free path.
    /// The local apply has already happened when the record is created.
    pub fn free(operation: OperationId, key: Key, class: OperationClass) -> Self {
        Self {
            operation,
            key,
            class,
            state: RecordState::Free(FreePhase::LocallyApplied),
        }
    }

    /// Record for an operation entering the consensus path.
    pub fn consensus(operation: OperationId, key: Key, class: OperationClass) -> Self {
        Self {
            operation,
            key,
            class,
            state: RecordState::Consensus(ConsensusPhase::Pending),
        }
    }

    /// Advance to `next`.
    ///
    /// Legal moves are the forward edges of each path's phase chain plus
    /// the timeout revert `Proposed -> Pending`. Committed records refuse
    /// every transition, and records never switch paths.
    pub fn advance(&mut self, next: RecordState) -> AlderResult<()> {
        use ConsensusPhase as C;
        use FreePhase as F;

        if self.state.is_committed() {
            return Err(AlderError::internal(format!(
                "record {} is committed and cannot transition to {next}",
                self.operation
            )));
        }
        let legal = matches!(
            (self.state, next),
            (RecordState::Free(F::LocallyApplied), RecordState::Free(F::Propagating))
                | (RecordState::Free(F::Propagating), RecordState::Free(F::Committed))
                | (RecordState::Consensus(C::Pending), RecordState::Consensus(C::Proposed))
                | (RecordState::Consensus(C::Proposed), RecordState::Consensus(C::Accepted))
                | (RecordState::Consensus(C::Proposed), RecordState::Consensus(C::Pending))
                | (RecordState::Consensus(C::Accepted), RecordState::Consensus(C::Committed))
        );
        if !legal {
            return Err(AlderError::internal(format!(
                "record {} cannot transition {} -> {next}",
                self.operation, self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// Outcome of a consensus decision after coordinator resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpOutcome {
    /// The effect was applied
    Applied,
    /// The guard failed; the operation committed as a no-op
    Rejected {
        /// Why the guard refused the operation
        reason: String,
    },
}

/// An agreed decision for one position in a key's committed history.
///
/// The coordinator resolves guards against its own state before proposing,
/// so the decision carries a concrete effect every replica applies
/// verbatim, in `seq` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedDecision {
    /// Operation the decision settles
    pub operation: OperationId,
    /// Replica the operation was submitted at
    pub origin: ReplicaId,
    /// Key whose history the decision extends
    pub key: Key,
    /// Kind of cell the key holds
    pub kind: SlotKind,
    /// Position in the key's total order, starting at 1
    pub seq: u64,
    /// Concrete effect to apply; `None` when the guard rejected
    pub effect: Option<Mutation>,
    /// Whether the operation applied or was rejected
    pub outcome: OpOutcome,
}

/// Callback surface executors use to report record progress.
///
/// The runtime implements this over its record registry; executors stay
/// independent of how records are stored.
pub trait RecordObserver: Send + Sync {
    /// An operation moved to `state`.
    fn transitioned(&self, operation: OperationId, state: RecordState);

    /// An operation reached its terminal state. `rounds` counts consensus
    /// attempts; the coordination-free path reports zero.
    fn committed(&self, operation: OperationId, outcome: OpOutcome, rounds: u32);

    /// An operation failed and will not commit.
    fn failed(&self, operation: OperationId, error: AlderError);
}

/// Sink for decisions that reached agreement.
///
/// The consensus path hands every committed decision here so the
/// anti-entropy layer can repair replicas that missed the commit
/// broadcast.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    /// Retain a committed decision for later repair.
    async fn record_decision(&self, decision: CommittedDecision);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_record() -> CommitRecord {
        CommitRecord::free(
            OperationId::from_label("op"),
            Key::from("k"),
            OperationClass::Abelian,
        )
    }

    fn consensus_record() -> CommitRecord {
        CommitRecord::consensus(
            OperationId::from_label("op"),
            Key::from("k"),
            OperationClass::Generic,
        )
    }

    #[test]
    fn free_path_walks_its_chain() {
        let mut record = free_record();
        record.advance(RecordState::Free(FreePhase::Propagating)).expect("forward");
        record.advance(RecordState::Free(FreePhase::Committed)).expect("forward");
        assert!(record.state.is_committed());
    }

    #[test]
    fn consensus_path_walks_its_chain() {
        let mut record = consensus_record();
        for next in [
            ConsensusPhase::Proposed,
            ConsensusPhase::Accepted,
            ConsensusPhase::Committed,
        ] {
            record.advance(RecordState::Consensus(next)).expect("forward");
        }
        assert!(record.state.is_committed());
    }

    #[test]
    fn timeout_revert_is_the_only_backward_edge() {
        let mut record = consensus_record();
        record.advance(RecordState::Consensus(ConsensusPhase::Proposed)).expect("forward");
        record.advance(RecordState::Consensus(ConsensusPhase::Pending)).expect("revert");
        // Accepted cannot revert.
        record.advance(RecordState::Consensus(ConsensusPhase::Proposed)).expect("forward");
        record.advance(RecordState::Consensus(ConsensusPhase::Accepted)).expect("forward");
        assert!(record
            .advance(RecordState::Consensus(ConsensusPhase::Pending))
            .is_err());
    }

    #[test]
    fn committed_is_terminal() {
        let mut record = free_record();
        record.advance(RecordState::Free(FreePhase::Propagating)).expect("forward");
        record.advance(RecordState::Free(FreePhase::Committed)).expect("forward");
        assert!(record.advance(RecordState::Free(FreePhase::Propagating)).is_err());
        assert!(record
            .advance(RecordState::Consensus(ConsensusPhase::Pending))
            .is_err());
    }

    #[test]
    fn records_never_switch_paths() {
        let mut record = consensus_record();
        assert!(record.advance(RecordState::Free(FreePhase::Propagating)).is_err());

        let mut record = free_record();
        assert!(record
            .advance(RecordState::Consensus(ConsensusPhase::Proposed))
            .is_err());
    }

    #[test]
    fn skipping_phases_is_refused() {
        let mut record = consensus_record();
        assert!(record
            .advance(RecordState::Consensus(ConsensusPhase::Committed))
            .is_err());
        let mut record = free_record();
        assert!(record.advance(RecordState::Free(FreePhase::Committed)).is_err());
    }
}
