//! The coordination-free executor.
//!
//! `execute` applies an operation locally and pushes it to every reachable
//! peer; the operation's record completes once all of them acknowledged.
//! A peer that missed the push picks the operation up through the periodic
//! digest exchange, which doubles as an implicit acknowledgement.
//!
//! Committed consensus decisions also pass through the oplog here, so a
//! replica cut off during a commit broadcast repairs itself from any peer.

use crate::config::GossipConfig;
use alder_core::{
    AlderError, AlderResult, ApplyStatus, CommittedDecision, DecisionLog, Envelope, FreePhase,
    OpDigest, OpOutcome, OperationDescriptor, OperationId, RecordObserver, RecordState, ReplicaId,
    ReplicaStore, ReplicatedOp, Transport, WireMessage,
};
use async_lock::RwLock;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Peers whose acknowledgement an operation still needs.
#[derive(Debug, Clone, Default)]
struct AckState {
    /// Peers reachable when dissemination started
    needed: BTreeSet<ReplicaId>,
    /// Peers that acknowledged so far
    acked: BTreeSet<ReplicaId>,
}

impl AckState {
    fn complete(&self) -> bool {
        self.needed.is_subset(&self.acked)
    }
}

/// Executes operations that need no agreement.
pub struct GossipExecutor {
    config: GossipConfig,
    /// Local replica id
    local: ReplicaId,
    /// Replica state all applies land in
    store: Arc<ReplicaStore>,
    /// Outbound delivery
    transport: Arc<dyn Transport>,
    /// Record progress callbacks
    observer: Arc<dyn RecordObserver>,
    /// Replicated operations retained for repair, by id
    oplog: Arc<RwLock<BTreeMap<OperationId, ReplicatedOp>>>,
    /// Insertion order for oplog eviction
    oplog_order: Arc<RwLock<VecDeque<OperationId>>>,
    /// Locally submitted operations awaiting acknowledgement
    in_flight: Arc<RwLock<BTreeMap<OperationId, AckState>>>,
    /// Pushes sent per peer since the last sync tick
    rate_limits: Arc<RwLock<BTreeMap<ReplicaId, usize>>>,
}

impl GossipExecutor {
    /// New executor over the given store and transport.
    pub fn new(
        config: GossipConfig,
        local: ReplicaId,
        store: Arc<ReplicaStore>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn RecordObserver>,
    ) -> Self {
        Self {
            config,
            local,
            store,
            transport,
            observer,
            oplog: Arc::new(RwLock::new(BTreeMap::new())),
            oplog_order: Arc::new(RwLock::new(VecDeque::new())),
            in_flight: Arc::new(RwLock::new(BTreeMap::new())),
            rate_limits: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Store this executor applies into.
    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    /// Locally submitted operations still awaiting acknowledgement.
    pub async fn awaiting_acks(&self) -> usize {
        self.in_flight.read().await.len()
    }

    /// Execute a coordination-free operation submitted at this replica.
    ///
    /// The local apply is synchronous; the caller's record advances to
    /// `Committed` once every peer reachable at dissemination time has
    /// acknowledged. With no reachable peers the operation commits
    /// immediately.
    ///
    /// Errors are synchronous refusals (poisoned key, kind mismatch,
    /// exhausted escrow share, backpressure); no observer callback fires
    /// for them.
    pub async fn execute(&self, descriptor: &OperationDescriptor) -> AlderResult<()> {
        {
            let in_flight = self.in_flight.read().await;
            if in_flight.len() >= self.config.max_in_flight {
                return Err(AlderError::busy(format!(
                    "{} operations awaiting acknowledgement",
                    in_flight.len()
                )));
            }
        }
        let status = self.store.apply_free(descriptor)?;
        self.append_oplog(ReplicatedOp::Free(descriptor.clone())).await;
        if status == ApplyStatus::Duplicate
            && self.in_flight.read().await.contains_key(&descriptor.id)
        {
            // Resubmission while the first attempt is still propagating.
            return Ok(());
        }

        let needed: BTreeSet<ReplicaId> = self.transport.reachable().into_iter().collect();
        if needed.is_empty() {
            self.observer.committed(descriptor.id, OpOutcome::Applied, 0);
            return Ok(());
        }
        self.in_flight.write().await.insert(
            descriptor.id,
            AckState { needed: needed.clone(), acked: BTreeSet::new() },
        );
        self.observer
            .transitioned(descriptor.id, RecordState::Free(FreePhase::Propagating));
        self.push_to_peers(&needed, ReplicatedOp::Free(descriptor.clone())).await;
        Ok(())
    }

    /// Absorb an operation pushed by a peer.
    ///
    /// Free operations are acknowledged even when the dedup log already
    /// has them; the sender needs the ack either way. Refused operations
    /// are not acknowledged and stay in flight at the sender.
    pub async fn handle_gossip(&self, from: ReplicaId, op: ReplicatedOp) -> AlderResult<()> {
        match &op {
            ReplicatedOp::Free(descriptor) => {
                let id = descriptor.id;
                self.store.apply_free(descriptor)?;
                self.append_oplog(op).await;
                let ack = Envelope::new(self.local, WireMessage::GossipAck { operation: id });
                self.transport.send(from, ack).await
            }
            ReplicatedOp::Decision(decision) => {
                let applied = self.store.apply_decision(decision)?;
                self.append_oplog(op.clone()).await;
                for decision in applied {
                    self.observer.committed(decision.operation, decision.outcome, 0);
                }
                Ok(())
            }
        }
    }

    /// Record a peer's acknowledgement of a disseminated operation.
    pub async fn record_ack(&self, from: ReplicaId, operation: OperationId) {
        let mut in_flight = self.in_flight.write().await;
        let Some(state) = in_flight.get_mut(&operation) else {
            return;
        };
        state.acked.insert(from);
        if state.complete() {
            in_flight.remove(&operation);
            drop(in_flight);
            self.observer.committed(operation, OpOutcome::Applied, 0);
        }
    }

    /// Summary of this replica's oplog window and per-key state.
    pub async fn build_digest(&self) -> AlderResult<OpDigest> {
        let ops = self.oplog.read().await.keys().copied().collect();
        let checksums = self.store.checksums()?;
        Ok(OpDigest { ops, checksums })
    }

    /// Reconcile against a peer's digest.
    ///
    /// Ops the peer lacks are pushed, ops we lack are pulled, and any
    /// in-flight operation present in the peer's digest counts as
    /// acknowledged. When both logs hold the same operations but a key's
    /// checksums disagree, that key has diverged: its coordination-free
    /// path is poisoned and the violation is returned.
    pub async fn handle_digest(&self, from: ReplicaId, theirs: OpDigest) -> AlderResult<()> {
        let mine = self.build_digest().await?;

        let acked: Vec<OperationId> = {
            let in_flight = self.in_flight.read().await;
            in_flight.keys().filter(|id| theirs.ops.contains(id)).copied().collect()
        };
        for operation in acked {
            self.record_ack(from, operation).await;
        }

        let they_lack: Vec<OperationId> = mine.ops.difference(&theirs.ops).copied().collect();
        if !they_lack.is_empty() {
            let ops = self.collect_ops(&they_lack).await;
            if !ops.is_empty() {
                let envelope = Envelope::new(self.local, WireMessage::SyncOps { ops });
                self.transport.send(from, envelope).await?;
            }
        }
        let missing: Vec<OperationId> = theirs.ops.difference(&mine.ops).copied().collect();
        if !missing.is_empty() {
            let envelope = Envelope::new(self.local, WireMessage::SyncPull { missing });
            self.transport.send(from, envelope).await?;
        }

        if mine.ops == theirs.ops {
            let mut violated = Vec::new();
            for (key, checksum) in &mine.checksums {
                if theirs.checksums.get(key).is_some_and(|c| c != checksum) {
                    violated.push(key.clone());
                }
            }
            for key in &violated {
                self.store.poison(key);
                tracing::error!(
                    %key,
                    peer = %from,
                    "replicas applied the same operations but disagree on state"
                );
            }
            if let Some(key) = violated.into_iter().next() {
                return Err(AlderError::convergence_violation(key));
            }
        }
        Ok(())
    }

    /// Answer a peer's pull for operations it is missing.
    pub async fn handle_pull(&self, from: ReplicaId, missing: &[OperationId]) -> AlderResult<()> {
        let ops = self.collect_ops(missing).await;
        if ops.is_empty() {
            return Ok(());
        }
        let envelope = Envelope::new(self.local, WireMessage::SyncOps { ops });
        self.transport.send(from, envelope).await
    }

    /// Absorb operations sent to fill a digest gap.
    ///
    /// Individually refused operations are logged and skipped so one bad
    /// entry does not block the rest of the batch.
    pub async fn handle_sync_ops(&self, from: ReplicaId, ops: Vec<ReplicatedOp>) -> AlderResult<()> {
        let count = ops.len();
        for op in ops {
            match &op {
                ReplicatedOp::Free(descriptor) => match self.store.apply_free(descriptor) {
                    Ok(_) => self.append_oplog(op).await,
                    Err(error) => {
                        tracing::warn!(operation = %descriptor.id, %error, "sync op refused");
                    }
                },
                ReplicatedOp::Decision(decision) => match self.store.apply_decision(decision) {
                    Ok(applied) => {
                        self.append_oplog(op.clone()).await;
                        for decision in applied {
                            self.observer.committed(decision.operation, decision.outcome, 0);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(operation = %decision.operation, %error, "sync decision refused");
                    }
                },
            }
        }
        tracing::trace!(peer = %from, count, "absorbed sync ops");
        Ok(())
    }

    /// One anti-entropy exchange with a randomly chosen reachable peer.
    pub async fn sync_round(&self) -> AlderResult<()> {
        self.rate_limits.write().await.clear();
        let peers = self.transport.reachable();
        let Some(peer) = peers.choose(&mut rand::thread_rng()).copied() else {
            return Ok(());
        };
        let digest = self.build_digest().await?;
        let envelope = Envelope::new(self.local, WireMessage::SyncDigest { digest });
        self.transport.send(peer, envelope).await
    }

    /// Run periodic anti-entropy until `shutdown` flips to true.
    pub async fn run_sync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sync_round().await {
                        tracing::warn!(%error, "anti-entropy round failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("anti-entropy loop stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn push_to_peers(&self, peers: &BTreeSet<ReplicaId>, op: ReplicatedOp) {
        for peer in peers {
            {
                let mut limits = self.rate_limits.write().await;
                let sent = limits.entry(*peer).or_insert(0);
                if *sent >= self.config.max_ops_per_peer {
                    // Anti-entropy repairs what the burst cap drops.
                    tracing::debug!(%peer, "push burst cap reached, deferring to sync");
                    continue;
                }
                *sent += 1;
            }
            let envelope = Envelope::new(self.local, WireMessage::Gossip { op: op.clone() });
            if let Err(error) = self.transport.send(*peer, envelope).await {
                tracing::debug!(%peer, %error, "gossip push failed");
            }
        }
    }

    async fn collect_ops(&self, ids: &[OperationId]) -> Vec<ReplicatedOp> {
        let oplog = self.oplog.read().await;
        ids.iter()
            .take(self.config.max_ops_per_sync)
            .filter_map(|id| oplog.get(id).cloned())
            .collect()
    }

    async fn append_oplog(&self, op: ReplicatedOp) {
        let mut oplog = self.oplog.write().await;
        let mut order = self.oplog_order.write().await;
        let id = op.id();
        if oplog.insert(id, op).is_none() {
            order.push_back(id);
        }
        while oplog.len() > self.config.max_oplog_entries {
            match order.pop_front() {
                Some(oldest) => {
                    oplog.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl DecisionLog for GossipExecutor {
    async fn record_decision(&self, decision: CommittedDecision) {
        self.append_oplog(ReplicatedOp::Decision(decision)).await;
    }
}
