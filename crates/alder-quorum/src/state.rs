//! Effect-free consensus round state.
//!
//! These structures hold everything a round needs to decide, and nothing
//! it needs to run: no timers, no channels, no transport. The executor
//! drives them through the pure functions in [`crate::transitions`].
//! BTree collections keep iteration deterministic.

use alder_core::{CommittedDecision, Key, OperationId, ReplicaId};
use std::collections::{BTreeMap, BTreeSet};

/// Coordinator-side state for one position in a key's committed order.
///
/// A round tracks one resolved decision through its proposal attempts.
/// The coordinator's own vote is implicit and never appears in `votes`.
#[derive(Debug, Clone)]
pub struct RoundState {
    /// The resolved decision up for a vote
    pub decision: CommittedDecision,
    /// Attempt number, starting at 1
    pub round: u32,
    /// Peers that accepted the current attempt
    pub votes: BTreeSet<ReplicaId>,
    /// Whether a quorum has accepted; irrevocable once set
    pub accepted: bool,
    /// Whether the origin withdrew the operation before acceptance
    pub cancelled: bool,
}

impl RoundState {
    /// Fresh first-attempt state for a resolved decision.
    pub fn new(decision: CommittedDecision) -> Self {
        Self {
            decision,
            round: 1,
            votes: BTreeSet::new(),
            accepted: false,
            cancelled: false,
        }
    }

    /// Key whose order this round extends.
    pub fn key(&self) -> &Key {
        &self.decision.key
    }

    /// Position this round fills.
    pub fn seq(&self) -> u64 {
        self.decision.seq
    }

    /// Operation being decided.
    pub fn operation(&self) -> OperationId {
        self.decision.operation
    }

    /// Votes counted toward the quorum, including the coordinator's own.
    pub fn tally(&self) -> usize {
        self.votes.len() + 1
    }
}

/// What an acceptor last acknowledged for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promise {
    /// Attempt number of the acknowledged proposal
    pub round: u32,
    /// Operation the acknowledged proposal carried
    pub operation: OperationId,
}

/// Acceptor-side memory of acknowledged proposals.
///
/// Lets an acceptor re-acknowledge retransmitted proposals idempotently
/// and notice when the coordinator abandoned one operation for a position
/// and proposed another. Entries are pruned as commits arrive.
#[derive(Debug, Clone, Default)]
pub struct PromiseLog {
    pub(crate) promises: BTreeMap<(Key, u64), Promise>,
}

impl PromiseLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Promise currently held for a position, if any.
    pub fn get(&self, key: &Key, seq: u64) -> Option<&Promise> {
        self.promises.get(&(key.clone(), seq))
    }

    /// Number of positions with an outstanding promise.
    pub fn len(&self) -> usize {
        self.promises.len()
    }

    /// Whether no promises are outstanding.
    pub fn is_empty(&self) -> bool {
        self.promises.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alder_core::{Mutation, OpOutcome, SlotKind};

    fn decision(label: &str, key: &str, seq: u64) -> CommittedDecision {
        CommittedDecision {
            operation: OperationId::from_label(label),
            origin: ReplicaId::from_label("origin"),
            key: Key::from(key),
            kind: SlotKind::Register,
            seq,
            effect: Some(Mutation::Write { value: "X".into() }),
            outcome: OpOutcome::Applied,
        }
    }

    #[test]
    fn fresh_rounds_start_with_only_the_implicit_vote() {
        let state = RoundState::new(decision("op", "k", 1));
        assert_eq!(state.round, 1);
        assert_eq!(state.tally(), 1);
        assert!(!state.accepted);
        assert!(!state.cancelled);
        assert_eq!(state.seq(), 1);
    }

    #[test]
    fn promise_log_tracks_positions_independently() {
        let mut log = PromiseLog::new();
        log.promises.insert(
            (Key::from("a"), 1),
            Promise { round: 1, operation: OperationId::from_label("x") },
        );
        log.promises.insert(
            (Key::from("a"), 2),
            Promise { round: 2, operation: OperationId::from_label("y") },
        );
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.get(&Key::from("a"), 1).map(|p| p.operation),
            Some(OperationId::from_label("x"))
        );
        assert!(log.get(&Key::from("b"), 1).is_none());
    }
}
