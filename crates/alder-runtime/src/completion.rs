//! Commit records, completion handles, and telemetry emission.
//!
//! Every submitted operation is registered here before execution starts.
//! The executors report phase changes and terminal outcomes through the
//! [`RecordObserver`] trait; the hub advances the operation's
//! [`CommitRecord`], wakes the submitter's [`CommitHandle`], and emits
//! one [`OperationReport`] per operation at terminal state.

use alder_algebra::Route;
use alder_core::{
    AlderError, AlderResult, CommitRecord, Confidence, ConsensusPhase, ExecutionPath, FreePhase,
    OpOutcome, OperationDescriptor, OperationId, OperationReport, RecordObserver, RecordState,
    ReportOutcome, TelemetrySink,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Terminal result delivered to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The operation committed; a rejected outcome still commits, as a
    /// no-op at its agreed position
    Committed {
        /// What the commit decided
        outcome: OpOutcome,
        /// Consensus rounds used; zero on the coordination-free path
        rounds: u32,
    },
    /// The operation failed and will not commit
    Failed {
        /// Why it failed
        error: AlderError,
    },
}

/// Caller-side handle for one submitted operation.
///
/// Cheap to hold; the operation completes whether or not anyone waits.
#[derive(Debug)]
pub struct CommitHandle {
    operation: OperationId,
    receiver: watch::Receiver<Option<Completion>>,
}

impl CommitHandle {
    /// Operation this handle tracks.
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    /// Current terminal result, if the operation has reached one.
    pub fn peek(&self) -> Option<Completion> {
        self.receiver.borrow().clone()
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait(&mut self) -> AlderResult<Completion> {
        let completion = self
            .receiver
            .wait_for(|completion| completion.is_some())
            .await
            .map_err(|_| AlderError::internal("completion channel closed"))?
            .clone();
        completion.ok_or_else(|| AlderError::internal("completion channel closed"))
    }

    /// Wait up to `limit`; `None` when the operation is still in flight.
    pub async fn wait_timeout(&mut self, limit: Duration) -> AlderResult<Option<Completion>> {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

struct TrackedOp {
    record: CommitRecord,
    operator: String,
    confidence: Confidence,
    path: ExecutionPath,
    started: Instant,
    notify: watch::Sender<Option<Completion>>,
}

#[derive(Default)]
struct HubInner {
    tracked: BTreeMap<OperationId, TrackedOp>,
    archive: VecDeque<CommitRecord>,
}

/// Registry of in-flight commit records plus an archive of terminal ones.
///
/// Implements [`RecordObserver`] so both executors report into it. Only
/// operations registered here (those submitted locally) produce reports;
/// commits applied on behalf of other replicas pass through silently.
pub struct CompletionHub {
    telemetry: Arc<dyn TelemetrySink>,
    archive_capacity: usize,
    inner: Mutex<HubInner>,
}

impl CompletionHub {
    /// Hub reporting into `telemetry`, archiving up to `archive_capacity`
    /// terminal records.
    pub fn new(telemetry: Arc<dyn TelemetrySink>, archive_capacity: usize) -> Self {
        Self {
            telemetry,
            archive_capacity,
            inner: Mutex::new(HubInner::default()),
        }
    }

    /// Register a submission and hand back the caller's handle.
    pub fn register(&self, descriptor: &OperationDescriptor, route: Route) -> CommitHandle {
        let record = match route.path {
            ExecutionPath::CoordinationFree => {
                CommitRecord::free(descriptor.id, descriptor.key.clone(), route.class)
            }
            ExecutionPath::Consensus => {
                CommitRecord::consensus(descriptor.id, descriptor.key.clone(), route.class)
            }
        };
        let (notify, receiver) = watch::channel(None);
        let tracked = TrackedOp {
            record,
            operator: descriptor.mutation.operator_name().to_string(),
            confidence: route.confidence,
            path: route.path,
            started: Instant::now(),
            notify,
        };
        self.inner.lock().tracked.insert(descriptor.id, tracked);
        CommitHandle { operation: descriptor.id, receiver }
    }

    /// Execution state of `operation`, tracked or archived.
    pub fn state(&self, operation: OperationId) -> Option<RecordState> {
        self.record(operation).map(|record| record.state)
    }

    /// Commit record for `operation`, tracked or archived.
    pub fn record(&self, operation: OperationId) -> Option<CommitRecord> {
        let inner = self.inner.lock();
        inner
            .tracked
            .get(&operation)
            .map(|tracked| tracked.record.clone())
            .or_else(|| {
                inner
                    .archive
                    .iter()
                    .find(|record| record.operation == operation)
                    .cloned()
            })
    }

    /// Operations registered but not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().tracked.len()
    }

    /// Terminal records still retained, oldest first.
    pub fn archived(&self) -> Vec<CommitRecord> {
        self.inner.lock().archive.iter().cloned().collect()
    }
}

impl RecordObserver for CompletionHub {
    fn transitioned(&self, operation: OperationId, state: RecordState) {
        let mut inner = self.inner.lock();
        let Some(tracked) = inner.tracked.get_mut(&operation) else {
            return;
        };
        match tracked.record.advance(state) {
            Ok(()) => debug!(op = %operation, state = %state, "record advanced"),
            Err(error) => warn!(op = %operation, %error, "illegal record transition reported"),
        }
    }

    fn committed(&self, operation: OperationId, outcome: OpOutcome, rounds: u32) {
        let Some(mut tracked) = self.inner.lock().tracked.remove(&operation) else {
            return;
        };
        // An origin that forwarded the operation away never saw the
        // intermediate phases; walk whatever remains of the chain.
        while !tracked.record.state.is_committed() {
            let next = next_toward_commit(tracked.record.state);
            if let Err(error) = tracked.record.advance(next) {
                warn!(op = %operation, %error, "record walk stalled");
                break;
            }
        }
        let report = OperationReport {
            operation,
            key: tracked.record.key.clone(),
            operator: tracked.operator,
            class: tracked.record.class,
            confidence: tracked.confidence,
            path: tracked.path,
            rounds,
            latency: tracked.started.elapsed(),
            outcome: match &outcome {
                OpOutcome::Applied => ReportOutcome::Committed,
                OpOutcome::Rejected { .. } => ReportOutcome::Rejected,
            },
        };
        {
            let mut inner = self.inner.lock();
            inner.archive.push_back(tracked.record);
            while inner.archive.len() > self.archive_capacity {
                inner.archive.pop_front();
            }
        }
        self.telemetry.report(report);
        tracked.notify.send_replace(Some(Completion::Committed { outcome, rounds }));
    }

    fn failed(&self, operation: OperationId, error: AlderError) {
        let Some(tracked) = self.inner.lock().tracked.remove(&operation) else {
            return;
        };
        let rounds = match &error {
            AlderError::QuorumTimeout { attempts, .. } => *attempts,
            _ => 0,
        };
        let report = OperationReport {
            operation,
            key: tracked.record.key,
            operator: tracked.operator,
            class: tracked.record.class,
            confidence: tracked.confidence,
            path: tracked.path,
            rounds,
            latency: tracked.started.elapsed(),
            outcome: ReportOutcome::Failed { error: error.to_string() },
        };
        self.telemetry.report(report);
        tracked.notify.send_replace(Some(Completion::Failed { error }));
    }
}

/// The next phase on the record's own path, heading to `Committed`.
fn next_toward_commit(state: RecordState) -> RecordState {
    match state {
        RecordState::Free(FreePhase::LocallyApplied) => RecordState::Free(FreePhase::Propagating),
        RecordState::Free(_) => RecordState::Free(FreePhase::Committed),
        RecordState::Consensus(ConsensusPhase::Pending) => {
            RecordState::Consensus(ConsensusPhase::Proposed)
        }
        RecordState::Consensus(ConsensusPhase::Proposed) => {
            RecordState::Consensus(ConsensusPhase::Accepted)
        }
        RecordState::Consensus(_) => RecordState::Consensus(ConsensusPhase::Committed),
    }
}
