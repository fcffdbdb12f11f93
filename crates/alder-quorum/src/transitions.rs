//! Pure transitions for consensus rounds.
//!
//! Each function checks its preconditions first and mutates state only
//! when they hold. No I/O, no clocks: same inputs, same outputs. The
//! executor layers timers and the wire protocol on top.

use crate::state::{Promise, PromiseLog, RoundState};
use alder_core::{AlderError, AlderResult, Key, OperationId, ReplicaId};

/// Outcome of recording one acceptor's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote recorded, quorum not yet reached
    Recorded,
    /// This vote completed the quorum
    QuorumReached,
    /// The voter already voted in this attempt
    Duplicate,
    /// Vote for a past attempt, another operation, or a settled round
    Stale,
}

/// Record a vote for the round's current attempt.
///
/// Preconditions:
/// - The vote names this round's attempt number and operation
/// - The round is still open (not accepted, not cancelled)
///
/// Effects:
/// - Adds the voter; marks the round accepted when the tally (including
///   the coordinator's implicit vote) reaches `quorum`
pub fn record_vote(
    state: &mut RoundState,
    quorum: usize,
    voter: ReplicaId,
    round: u32,
    operation: OperationId,
) -> VoteOutcome {
    if round != state.round || operation != state.operation() {
        return VoteOutcome::Stale;
    }
    if state.accepted || state.cancelled {
        return VoteOutcome::Stale;
    }
    if !state.votes.insert(voter) {
        return VoteOutcome::Duplicate;
    }
    if state.tally() >= quorum {
        state.accepted = true;
        VoteOutcome::QuorumReached
    } else {
        VoteOutcome::Recorded
    }
}

/// Revert a proposal that missed its quorum, readying the next attempt.
///
/// Preconditions:
/// - No quorum accepted (accepted rounds are irrevocable)
/// - Not cancelled
///
/// Effects:
/// - Bumps the attempt number and discards the stale votes
pub fn revert_for_retry(state: &mut RoundState) -> AlderResult<()> {
    if state.accepted {
        return Err(AlderError::internal(format!(
            "operation {} is accepted and cannot revert",
            state.operation()
        )));
    }
    if state.cancelled {
        return Err(AlderError::cancelled(format!(
            "operation {} was withdrawn",
            state.operation()
        )));
    }
    state.round += 1;
    state.votes.clear();
    Ok(())
}

/// Withdraw the round's operation.
///
/// Preconditions:
/// - No quorum accepted; once a majority accepts, the decision commits
///
/// Effects:
/// - Marks the round cancelled; later votes are stale
pub fn cancel_round(state: &mut RoundState) -> AlderResult<()> {
    if state.accepted {
        return Err(AlderError::invalid(format!(
            "operation {} already has a quorum and cannot be withdrawn",
            state.operation()
        )));
    }
    state.cancelled = true;
    Ok(())
}

/// Outcome of recording a proposal in the acceptor's promise log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseOutcome {
    /// First proposal seen for this position
    First,
    /// Same operation as before; the ack was lost or the round retried
    Repeat,
    /// The coordinator abandoned a different operation for this position
    Superseded {
        /// Operation previously promised here
        previous: OperationId,
    },
}

/// Record a proposal from the position's coordinator.
///
/// Always succeeds: with a single stable coordinator per key, whatever it
/// proposes for an uncommitted position is the position's current
/// candidate. The outcome tells the caller what the log previously held.
pub fn record_promise(
    log: &mut PromiseLog,
    key: Key,
    seq: u64,
    round: u32,
    operation: OperationId,
) -> PromiseOutcome {
    let promise = Promise { round, operation };
    match log.promises.insert((key, seq), promise) {
        None => PromiseOutcome::First,
        Some(previous) if previous.operation == operation => PromiseOutcome::Repeat,
        Some(previous) => PromiseOutcome::Superseded { previous: previous.operation },
    }
}

/// Drop promises for positions at or below a key's committed watermark.
pub fn prune_promises(log: &mut PromiseLog, key: &Key, committed_seq: u64) {
    log.promises
        .retain(|(k, seq), _| k != key || *seq > committed_seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alder_core::{CommittedDecision, Mutation, OpOutcome, SlotKind};

    fn replica(label: &str) -> ReplicaId {
        ReplicaId::from_label(label)
    }

    fn round_state(label: &str) -> RoundState {
        RoundState::new(CommittedDecision {
            operation: OperationId::from_label(label),
            origin: replica("origin"),
            key: Key::from("k"),
            kind: SlotKind::Register,
            seq: 1,
            effect: Some(Mutation::Write { value: "X".into() }),
            outcome: OpOutcome::Applied,
        })
    }

    #[test]
    fn votes_accumulate_to_quorum() {
        let mut state = round_state("op");
        let op = state.operation();

        assert_eq!(record_vote(&mut state, 3, replica("a"), 1, op), VoteOutcome::Recorded);
        assert!(!state.accepted);
        assert_eq!(
            record_vote(&mut state, 3, replica("b"), 1, op),
            VoteOutcome::QuorumReached
        );
        assert!(state.accepted);
    }

    #[test]
    fn one_vote_per_voter_per_attempt() {
        let mut state = round_state("op");
        let op = state.operation();

        assert_eq!(record_vote(&mut state, 3, replica("a"), 1, op), VoteOutcome::Recorded);
        assert_eq!(record_vote(&mut state, 3, replica("a"), 1, op), VoteOutcome::Duplicate);
        assert_eq!(state.tally(), 2);
    }

    #[test]
    fn votes_for_other_attempts_or_operations_are_stale() {
        let mut state = round_state("op");
        let op = state.operation();

        assert_eq!(record_vote(&mut state, 3, replica("a"), 2, op), VoteOutcome::Stale);
        assert_eq!(
            record_vote(&mut state, 3, replica("a"), 1, OperationId::from_label("other")),
            VoteOutcome::Stale
        );
        assert_eq!(state.tally(), 1);
    }

    #[test]
    fn settled_rounds_ignore_votes() {
        let mut state = round_state("op");
        let op = state.operation();
        record_vote(&mut state, 2, replica("a"), 1, op);
        assert!(state.accepted);
        assert_eq!(record_vote(&mut state, 2, replica("b"), 1, op), VoteOutcome::Stale);
    }

    #[test]
    fn revert_clears_votes_and_bumps_the_attempt() {
        let mut state = round_state("op");
        let op = state.operation();
        record_vote(&mut state, 3, replica("a"), 1, op);

        revert_for_retry(&mut state).expect("revert");
        assert_eq!(state.round, 2);
        assert_eq!(state.tally(), 1);

        // Straggler vote for the reverted attempt no longer counts.
        assert_eq!(record_vote(&mut state, 3, replica("b"), 1, op), VoteOutcome::Stale);
        assert_eq!(record_vote(&mut state, 3, replica("b"), 2, op), VoteOutcome::Recorded);
    }

    #[test]
    fn accepted_rounds_are_irrevocable() {
        let mut state = round_state("op");
        let op = state.operation();
        record_vote(&mut state, 2, replica("a"), 1, op);
        assert!(state.accepted);

        assert!(revert_for_retry(&mut state).is_err());
        assert!(cancel_round(&mut state).is_err());
    }

    #[test]
    fn cancellation_blocks_further_progress() {
        let mut state = round_state("op");
        let op = state.operation();

        cancel_round(&mut state).expect("cancel");
        assert_eq!(record_vote(&mut state, 2, replica("a"), 1, op), VoteOutcome::Stale);
        assert!(!state.accepted);
        assert!(revert_for_retry(&mut state).is_err());
    }

    #[test]
    fn promises_repeat_and_supersede() {
        let mut log = PromiseLog::new();
        let key = Key::from("k");
        let first = OperationId::from_label("first");
        let second = OperationId::from_label("second");

        assert_eq!(record_promise(&mut log, key.clone(), 1, 1, first), PromiseOutcome::First);
        assert_eq!(record_promise(&mut log, key.clone(), 1, 2, first), PromiseOutcome::Repeat);
        assert_eq!(
            record_promise(&mut log, key.clone(), 1, 1, second),
            PromiseOutcome::Superseded { previous: first }
        );
        assert_eq!(log.get(&key, 1).map(|p| p.operation), Some(second));
    }

    #[test]
    fn pruning_respects_key_and_watermark() {
        let mut log = PromiseLog::new();
        let op = OperationId::from_label("op");
        record_promise(&mut log, Key::from("a"), 1, 1, op);
        record_promise(&mut log, Key::from("a"), 2, 1, op);
        record_promise(&mut log, Key::from("b"), 1, 1, op);

        prune_promises(&mut log, &Key::from("a"), 1);
        assert!(log.get(&Key::from("a"), 1).is_none());
        assert!(log.get(&Key::from("a"), 2).is_some());
        assert!(log.get(&Key::from("b"), 1).is_some());
    }
}
