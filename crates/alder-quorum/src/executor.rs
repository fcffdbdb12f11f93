//! Driver for the consensus path.
//!
//! Each key has one stable coordinator, named identically at every
//! replica by [`Membership::coordinator_for`]. The coordinator resolves
//! an operation into a concrete decision at the key's next position,
//! proposes it, waits for a majority of acknowledgements, then applies
//! and broadcasts the commit. Missed rounds revert to pending and retry
//! with jittered backoff; acceptance is irrevocable once a quorum is in.

use crate::config::QuorumConfig;
use crate::resolve::resolve;
use crate::state::{PromiseLog, RoundState};
use crate::transitions::{
    cancel_round, prune_promises, record_promise, record_vote, revert_for_retry, PromiseOutcome,
    VoteOutcome,
};
use alder_core::{
    AlderError, AlderResult, CommittedDecision, ConsensusPhase, DecisionLog, Envelope, Key,
    Membership, OperationDescriptor, OperationId, RecordObserver, RecordState, ReplicaId,
    ReplicaStore, Transport, WireMessage,
};
use async_lock::{Mutex, RwLock};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Verdict a waiting coordinator task is woken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundSignal {
    /// Votes still outstanding
    Waiting,
    /// A majority accepted the current attempt
    Quorum,
    /// The origin withdrew the operation
    Cancelled,
}

/// Voting state for a key's in-flight position, plus the channel that
/// wakes the coordinating task when the round settles.
struct ActiveRound {
    state: RoundState,
    signal: watch::Sender<RoundSignal>,
}

/// Executes operations that need a per-key total order.
///
/// One instance runs per replica and plays both roles: coordinator for
/// the keys that hash to it, acceptor for everyone else's proposals.
pub struct QuorumExecutor {
    config: QuorumConfig,
    local: ReplicaId,
    membership: Membership,
    store: Arc<ReplicaStore>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn RecordObserver>,
    decisions: Arc<dyn DecisionLog>,
    /// One entry per key currently being coordinated here.
    rounds: Arc<RwLock<BTreeMap<Key, ActiveRound>>>,
    /// Serializes coordination per key; decisions for a key are resolved
    /// one at a time against the state left by the previous one.
    key_locks: Arc<RwLock<BTreeMap<Key, Arc<Mutex<()>>>>>,
    /// Acceptor-side memory of proposals, for idempotent re-acks.
    promises: Arc<Mutex<PromiseLog>>,
    /// Withdrawals noted before the operation reached this coordinator.
    queued_cancels: Arc<Mutex<BTreeSet<OperationId>>>,
}

impl QuorumExecutor {
    /// Build an executor for `local` within `membership`.
    pub fn new(
        config: QuorumConfig,
        local: ReplicaId,
        membership: Membership,
        store: Arc<ReplicaStore>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn RecordObserver>,
        decisions: Arc<dyn DecisionLog>,
    ) -> Self {
        Self {
            config,
            local,
            membership,
            store,
            transport,
            observer,
            decisions,
            rounds: Arc::new(RwLock::new(BTreeMap::new())),
            key_locks: Arc::new(RwLock::new(BTreeMap::new())),
            promises: Arc::new(Mutex::new(PromiseLog::new())),
            queued_cancels: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Cluster membership this executor coordinates within.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Keys with a round in flight at this coordinator.
    pub async fn active_rounds(&self) -> usize {
        self.rounds.read().await.len()
    }

    /// Route `descriptor` to its key's coordinator and drive it to a
    /// terminal state.
    ///
    /// Spawn this rather than awaiting it from a transport inbox loop:
    /// the coordinator blocks in here waiting for votes that arrive
    /// through that same loop.
    pub async fn execute(&self, descriptor: OperationDescriptor) {
        let coordinator = self.membership.coordinator_for(&descriptor.key);
        if coordinator == self.local {
            self.run_locally(descriptor).await;
            return;
        }
        let operation = descriptor.id;
        debug!(op = %operation, to = %coordinator, "forwarding to the key's coordinator");
        let envelope = Envelope::new(self.local, WireMessage::Forward { operation: descriptor });
        if let Err(error) = self.transport.send(coordinator, envelope).await {
            self.observer.failed(operation, error);
        }
    }

    /// Take over an operation forwarded by its origin.
    ///
    /// Blocks until the operation terminates, like [`Self::execute`], so
    /// the same spawning caveat applies.
    pub async fn handle_forward(&self, descriptor: OperationDescriptor) {
        if self.membership.coordinator_for(&descriptor.key) != self.local {
            warn!(
                op = %descriptor.id,
                key = %descriptor.key,
                "forwarded here but this replica is not the coordinator"
            );
            return;
        }
        self.run_locally(descriptor).await;
    }

    async fn run_locally(&self, descriptor: OperationDescriptor) {
        let operation = descriptor.id;
        let origin = descriptor.origin;
        if let Err(error) = self.coordinate(descriptor).await {
            if origin == self.local {
                self.observer.failed(operation, error);
            } else {
                let reject = WireMessage::Reject { operation, error };
                if let Err(error) = self.transport.send(origin, Envelope::new(self.local, reject)).await {
                    warn!(op = %operation, %error, "could not return the rejection to its origin");
                }
            }
        }
    }

    /// Resolve, propose, and commit one operation as its key's
    /// coordinator.
    async fn coordinate(&self, descriptor: OperationDescriptor) -> AlderResult<()> {
        let key = descriptor.key.clone();
        let operation = descriptor.id;
        let serial = self.key_lock(&key).await;
        let _guard = serial.lock().await;

        if self.queued_cancels.lock().await.remove(&operation) {
            return Err(AlderError::cancelled("withdrawn before coordination began"));
        }

        // A coordinator cut off from a majority refuses up front instead
        // of burning rounds it cannot win.
        let quorum = self.membership.quorum();
        let reachable = self.reachable_members();
        if reachable < quorum {
            return Err(AlderError::partition_blocked(reachable, quorum));
        }

        let seq = self.store.committed_seq(&key) + 1;
        let decision = resolve(&self.store, &descriptor, seq);

        let mut state = RoundState::new(decision.clone());
        // A single-replica cluster is its own quorum.
        let initial = if state.tally() >= quorum {
            state.accepted = true;
            RoundSignal::Quorum
        } else {
            RoundSignal::Waiting
        };
        let (signal, mut settled) = watch::channel(initial);
        self.rounds.write().await.insert(key.clone(), ActiveRound { state, signal });

        let mut attempt: u32 = 1;
        let verdict = loop {
            self.observer
                .transitioned(operation, RecordState::Consensus(ConsensusPhase::Proposed));
            self.broadcast_to_members(WireMessage::Propose {
                round: attempt,
                decision: decision.clone(),
            })
            .await;

            let wait = tokio::time::timeout(
                self.config.round_timeout,
                settled.wait_for(|signal| *signal != RoundSignal::Waiting),
            )
            .await
            .map(|result| result.map(|signal| *signal));
            match wait {
                Ok(Ok(signal)) => {
                    if signal == RoundSignal::Cancelled {
                        break Err(AlderError::cancelled("withdrawn before acceptance"));
                    }
                    break Ok(());
                }
                Ok(Err(_)) => break Err(AlderError::internal("round signal dropped")),
                Err(_) => {
                    // The round state is authoritative; a quorum may have
                    // landed in the gap between the timer and this lock.
                    let mut rounds = self.rounds.write().await;
                    let Some(active) = rounds.get_mut(&key) else {
                        break Err(AlderError::internal("active round vanished"));
                    };
                    if active.state.accepted {
                        break Ok(());
                    }
                    if active.state.cancelled {
                        break Err(AlderError::cancelled("withdrawn before acceptance"));
                    }
                    if attempt >= self.config.max_rounds {
                        break Err(AlderError::quorum_timeout(key.clone(), attempt));
                    }
                    if let Err(error) = revert_for_retry(&mut active.state) {
                        break Err(error);
                    }
                    drop(rounds);
                    self.observer
                        .transitioned(operation, RecordState::Consensus(ConsensusPhase::Pending));
                    debug!(op = %operation, attempt, "round missed its quorum, backing off");
                    tokio::time::sleep(self.backoff_with_jitter(attempt - 1)).await;
                    attempt += 1;
                }
            }
        };

        self.rounds.write().await.remove(&key);
        verdict?;

        self.observer
            .transitioned(operation, RecordState::Consensus(ConsensusPhase::Accepted));
        let applied = self.store.apply_decision(&decision)?;
        self.decisions.record_decision(decision.clone()).await;
        self.broadcast_to_members(WireMessage::Commit { round: attempt, decision: decision.clone() })
            .await;
        info!(
            op = %operation,
            key = %key,
            rounds = attempt,
            outcome = ?decision.outcome,
            "decision committed"
        );
        for committed in applied {
            let rounds = if committed.operation == operation { attempt } else { 1 };
            self.observer.committed(committed.operation, committed.outcome, rounds);
        }
        Ok(())
    }

    /// Acknowledge a proposal from `from`, the claimed coordinator.
    ///
    /// Acknowledgements are idempotent; a repeated proposal is re-acked
    /// so a lost reply cannot wedge the round.
    pub async fn handle_propose(
        &self,
        from: ReplicaId,
        round: u32,
        decision: &CommittedDecision,
    ) -> AlderResult<()> {
        if from != self.membership.coordinator_for(&decision.key) {
            return Err(AlderError::invalid(format!(
                "proposal for '{}' from {from}, which is not its coordinator",
                decision.key
            )));
        }
        let outcome = {
            let mut promises = self.promises.lock().await;
            record_promise(
                &mut promises,
                decision.key.clone(),
                decision.seq,
                round,
                decision.operation,
            )
        };
        if let PromiseOutcome::Superseded { previous } = outcome {
            debug!(
                op = %decision.operation,
                %previous,
                "proposal supersedes an abandoned candidate"
            );
        }
        let accept = WireMessage::Accept {
            round,
            key: decision.key.clone(),
            seq: decision.seq,
            operation: decision.operation,
        };
        self.transport.send(from, Envelope::new(self.local, accept)).await
    }

    /// Count a vote for the round in flight on `key`.
    pub async fn handle_accept(
        &self,
        from: ReplicaId,
        round: u32,
        key: &Key,
        seq: u64,
        operation: OperationId,
    ) {
        if !self.membership.contains(&from) {
            debug!(%from, "vote from a non-member ignored");
            return;
        }
        let mut rounds = self.rounds.write().await;
        let Some(active) = rounds.get_mut(key) else {
            debug!(op = %operation, "vote for a settled round ignored");
            return;
        };
        if active.state.seq() != seq {
            debug!(op = %operation, seq, "vote for another position ignored");
            return;
        }
        match record_vote(&mut active.state, self.membership.quorum(), from, round, operation) {
            VoteOutcome::QuorumReached => {
                debug!(op = %operation, round, "quorum reached");
                // Signalled under the same write lock that cancellation
                // takes, so the verdicts cannot overwrite each other.
                active.signal.send_replace(RoundSignal::Quorum);
            }
            VoteOutcome::Recorded => {
                debug!(op = %operation, round, tally = active.state.tally(), "vote recorded");
            }
            VoteOutcome::Duplicate | VoteOutcome::Stale => {}
        }
    }

    /// Apply a decision committed by `from`, the key's coordinator.
    pub async fn handle_commit(
        &self,
        from: ReplicaId,
        round: u32,
        decision: &CommittedDecision,
    ) -> AlderResult<()> {
        if from != self.membership.coordinator_for(&decision.key) {
            return Err(AlderError::invalid(format!(
                "commit for '{}' from {from}, which is not its coordinator",
                decision.key
            )));
        }
        let applied = self.store.apply_decision(decision)?;
        {
            let mut promises = self.promises.lock().await;
            prune_promises(&mut promises, &decision.key, self.store.committed_seq(&decision.key));
        }
        for committed in applied {
            self.decisions.record_decision(committed.clone()).await;
            let rounds = if committed.operation == decision.operation { round } else { 1 };
            self.observer.committed(committed.operation, committed.outcome, rounds);
        }
        Ok(())
    }

    /// Surface a rejection returned by a remote coordinator.
    pub fn handle_reject(&self, operation: OperationId, error: AlderError) {
        self.observer.failed(operation, error);
    }

    /// Withdraw `operation` unless a quorum has already accepted it.
    ///
    /// Returns whether the withdrawal took effect. An operation that has
    /// not reached this coordinator yet is noted and refused on arrival.
    pub async fn cancel(&self, operation: OperationId) -> bool {
        let mut rounds = self.rounds.write().await;
        if let Some(active) =
            rounds.values_mut().find(|active| active.state.operation() == operation)
        {
            if cancel_round(&mut active.state).is_ok() {
                active.signal.send_replace(RoundSignal::Cancelled);
                info!(op = %operation, "operation withdrawn");
                return true;
            }
            return false;
        }
        drop(rounds);
        self.queued_cancels.lock().await.insert(operation);
        true
    }

    async fn key_lock(&self, key: &Key) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.write().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Members reachable right now, counting this replica.
    fn reachable_members(&self) -> usize {
        let peers = self
            .transport
            .reachable()
            .into_iter()
            .filter(|peer| self.membership.contains(peer))
            .count();
        peers + 1
    }

    async fn broadcast_to_members(&self, message: WireMessage) {
        for peer in self.membership.peers(&self.local) {
            let envelope = Envelope::new(self.local, message.clone());
            if let Err(error) = self.transport.send(peer, envelope).await {
                debug!(to = %peer, %error, "round broadcast send failed");
            }
        }
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_delay(attempt);
        let spread = (base.as_millis() as u64 / 4).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}
