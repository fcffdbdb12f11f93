//! The replica node: submission pipeline and wire dispatch.
//!
//! `Replica` wires the pure algebra (classify, decompose, route) to the
//! two executors and the completion hub. Submissions classify and route
//! synchronously; execution is immediate on the coordination-free path
//! and backgrounded on the consensus path, with completion delivered
//! through the returned [`CommitHandle`].

use crate::completion::{CommitHandle, CompletionHub};
use crate::config::ReplicaConfig;
use alder_algebra::{Advice, Advisor, Decomposer, Route, Router, SignatureAnalyzer};
use alder_core::{
    AlderResult, ConsensusPhase, DecisionLog, DecomposedOperation, Envelope, ExecutionPath,
    Membership, Mutation, OperationDescriptor, OperationId, RecordObserver, RecordState,
    ReplicaId, ReplicaStore, SignatureTable, TelemetrySink, Transport, WireMessage,
};
use alder_gossip::GossipExecutor;
use alder_quorum::QuorumExecutor;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Synchronous acceptance of one submission.
#[derive(Debug)]
pub struct SubmitReceipt {
    /// Id assigned to (or carried by) the operation
    pub operation: OperationId,
    /// Path and cost the router chose
    pub route: Route,
    /// Handle resolving when the operation reaches a terminal state
    pub handle: CommitHandle,
}

/// Background tasks started by [`Replica::start`].
pub struct ReplicaTasks {
    stop: watch::Sender<bool>,
    dispatch: JoinHandle<()>,
    sync: JoinHandle<()>,
}

impl ReplicaTasks {
    /// Stop both loops and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.dispatch.await;
        let _ = self.sync.await;
    }
}

/// One replica of the store.
pub struct Replica {
    local: ReplicaId,
    membership: Membership,
    store: Arc<ReplicaStore>,
    analyzer: SignatureAnalyzer,
    decomposer: Decomposer,
    router: Router,
    advisor: Advisor,
    gossip: Arc<GossipExecutor>,
    quorum: Arc<QuorumExecutor>,
    hub: Arc<CompletionHub>,
    /// Last issued write tag stamp; monotonic even when the wall clock
    /// repeats a microsecond.
    stamp: Mutex<u64>,
}

impl Replica {
    /// Assemble a replica from its membership, signature table, and
    /// transport.
    pub fn new(
        config: ReplicaConfig,
        local: ReplicaId,
        membership: Membership,
        signatures: Arc<SignatureTable>,
        transport: Arc<dyn Transport>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let store = Arc::new(ReplicaStore::new(local, Arc::clone(&signatures)));
        let hub = Arc::new(CompletionHub::new(telemetry, config.archive_capacity));
        let gossip = Arc::new(GossipExecutor::new(
            config.gossip,
            local,
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&hub) as Arc<dyn RecordObserver>,
        ));
        let quorum = Arc::new(QuorumExecutor::new(
            config.quorum,
            local,
            membership.clone(),
            Arc::clone(&store),
            transport,
            Arc::clone(&hub) as Arc<dyn RecordObserver>,
            Arc::clone(&gossip) as Arc<dyn DecisionLog>,
        ));
        let analyzer = SignatureAnalyzer::new(Arc::clone(&signatures));
        let router = Router::new(membership.len());
        let advisor = Advisor::new(SignatureAnalyzer::new(signatures), membership.len());
        Self {
            local,
            membership,
            store,
            analyzer,
            decomposer: Decomposer,
            router,
            advisor,
            gossip,
            quorum,
            hub,
            stamp: Mutex::new(0),
        }
    }

    /// This replica's id.
    pub fn local(&self) -> ReplicaId {
        self.local
    }

    /// The cluster this replica belongs to.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Read access to replicated state.
    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    /// Commit records and completion handles.
    pub fn completions(&self) -> &Arc<CompletionHub> {
        &self.hub
    }

    /// Submit one operation.
    ///
    /// Classifies, decomposes, and routes synchronously, then executes:
    /// coordination-free operations apply locally before this returns,
    /// consensus operations continue in the background. The receipt's
    /// handle resolves either way.
    pub async fn submit(&self, descriptor: OperationDescriptor) -> AlderResult<SubmitReceipt> {
        let decomposed = self.prepare(descriptor);
        let route = self.router.route(&decomposed);
        self.launch(decomposed.descriptor, route).await
    }

    /// Submit a batch under the max-cost composition rule.
    ///
    /// One operation with a universal part forces the entire batch onto
    /// the consensus path; every receipt carries the shared batch route.
    pub async fn submit_batch(
        &self,
        batch: Vec<OperationDescriptor>,
    ) -> AlderResult<Vec<SubmitReceipt>> {
        let decomposed: Vec<DecomposedOperation> =
            batch.into_iter().map(|descriptor| self.prepare(descriptor)).collect();
        let route = self.router.route_batch(&decomposed);
        let mut receipts = Vec::with_capacity(decomposed.len());
        for part in decomposed {
            receipts.push(self.launch(part.descriptor, route).await?);
        }
        Ok(receipts)
    }

    /// Withdraw a consensus operation that no quorum has accepted yet.
    ///
    /// Returns whether the withdrawal took effect. Coordination-free
    /// operations are already applied by the time submission returns and
    /// can never be withdrawn; neither can operations coordinated by
    /// another replica, whose commit may already be in flight here.
    pub async fn cancel(&self, operation: OperationId) -> bool {
        let Some(record) = self.hub.record(operation) else {
            return false;
        };
        let eligible = matches!(
            record.state,
            RecordState::Consensus(ConsensusPhase::Pending | ConsensusPhase::Proposed)
        );
        if !eligible {
            return false;
        }
        if self.membership.coordinator_for(&record.key) != self.local {
            debug!(op = %operation, "cannot withdraw from a remote coordinator");
            return false;
        }
        self.quorum.cancel(operation).await
    }

    /// Suggest an algebraic restructuring for `descriptor`, if one of the
    /// catalog rules applies.
    ///
    /// Advisory only: adopting a rewrite means submitting the rewritten
    /// descriptor through the normal pipeline.
    pub fn advise(&self, descriptor: &OperationDescriptor) -> Option<Advice> {
        self.advisor.advise(descriptor)
    }

    /// Start the background loops: wire dispatch and periodic
    /// anti-entropy.
    pub fn start(self: &Arc<Self>, inbox: mpsc::Receiver<Envelope>) -> ReplicaTasks {
        let (stop, stop_rx) = watch::channel(false);
        let sync = tokio::spawn(Arc::clone(&self.gossip).run_sync_loop(stop_rx.clone()));
        let dispatch = tokio::spawn(Arc::clone(self).run_inbox(inbox, stop_rx));
        ReplicaTasks { stop, dispatch, sync }
    }

    /// Dispatch one wire message.
    ///
    /// Handlers that block until an operation terminates (`Forward`) are
    /// spawned so the loop keeps feeding them the votes they wait on.
    pub async fn dispatch(&self, envelope: Envelope) {
        let from = envelope.from;
        match envelope.message {
            WireMessage::Gossip { op } => {
                if let Err(error) = self.gossip.handle_gossip(from, op).await {
                    warn!(%from, %error, "gossiped operation refused");
                }
            }
            WireMessage::GossipAck { operation } => {
                self.gossip.record_ack(from, operation).await;
            }
            WireMessage::SyncDigest { digest } => {
                if let Err(error) = self.gossip.handle_digest(from, digest).await {
                    warn!(%from, %error, "digest reconciliation failed");
                }
            }
            WireMessage::SyncPull { missing } => {
                if let Err(error) = self.gossip.handle_pull(from, &missing).await {
                    warn!(%from, %error, "pull request failed");
                }
            }
            WireMessage::SyncOps { ops } => {
                if let Err(error) = self.gossip.handle_sync_ops(from, ops).await {
                    warn!(%from, %error, "sync batch failed");
                }
            }
            WireMessage::Forward { operation } => {
                let quorum = Arc::clone(&self.quorum);
                tokio::spawn(async move { quorum.handle_forward(operation).await });
            }
            WireMessage::Propose { round, decision } => {
                if let Err(error) = self.quorum.handle_propose(from, round, &decision).await {
                    warn!(%from, %error, "proposal refused");
                }
            }
            WireMessage::Accept { round, key, seq, operation } => {
                self.quorum.handle_accept(from, round, &key, seq, operation).await;
            }
            WireMessage::Commit { round, decision } => {
                if let Err(error) = self.quorum.handle_commit(from, round, &decision).await {
                    warn!(%from, %error, "commit refused");
                }
            }
            WireMessage::Reject { operation, error } => {
                self.quorum.handle_reject(operation, error);
            }
        }
    }

    fn prepare(&self, mut descriptor: OperationDescriptor) -> DecomposedOperation {
        self.stamp_write_tag(&mut descriptor);
        self.decomposer.analyze_and_decompose(&self.analyzer, descriptor)
    }

    async fn launch(
        &self,
        descriptor: OperationDescriptor,
        route: Route,
    ) -> AlderResult<SubmitReceipt> {
        let operation = descriptor.id;
        let handle = self.hub.register(&descriptor, route);
        match route.path {
            ExecutionPath::CoordinationFree => {
                if let Err(error) = self.gossip.execute(&descriptor).await {
                    // surface backpressure and poisoned keys synchronously
                    self.hub.failed(operation, error.clone());
                    return Err(error);
                }
            }
            ExecutionPath::Consensus => {
                let quorum = Arc::clone(&self.quorum);
                tokio::spawn(async move { quorum.execute(descriptor).await });
            }
        }
        Ok(SubmitReceipt { operation, route, handle })
    }

    async fn run_inbox(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<Envelope>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                received = inbox.recv() => match received {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
            }
        }
    }

    /// Fill in a zero write tag with a fresh local stamp.
    ///
    /// Submitters that do not keep clocks pass `stamp == 0`; the replica
    /// assigns a monotonic microsecond stamp tied to itself so concurrent
    /// writes at different replicas stay totally ordered by tag.
    fn stamp_write_tag(&self, descriptor: &mut OperationDescriptor) {
        if let Mutation::WriteLww { tag, .. } = &mut descriptor.mutation {
            if tag.stamp == 0 {
                tag.stamp = self.next_stamp();
                tag.replica = self.local;
            }
        }
    }

    fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_micros() as u64);
        let mut last = self.stamp.lock();
        *last = (*last).max(now) + 1;
        *last
    }
}
