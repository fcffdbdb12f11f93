//! Replica state: typed cells, the applied-operation log, and sequenced
//! application of agreed decisions.
//!
//! Each key owns one cell behind its own lock, so operations on different
//! keys never contend. A cell records which coordination-free operation
//! ids it has applied (replays are no-ops) and the highest contiguous
//! committed position of the consensus path (later positions buffer until
//! the gap fills).

use crate::descriptor::{Mutation, OperationDescriptor, SlotKind};
use crate::errors::{AlderError, AlderResult};
use crate::hash::{self, Digest32};
use crate::identifiers::{Key, OperationId, ReplicaId};
use crate::lattice::{LwwRegister, MaxRegister, PnCounter, TombstoneSet};
use crate::record::CommittedDecision;
use crate::signature::SignatureTable;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// One key's storage discipline.
///
/// The kind is fixed by the first mutation applied to the key; mutations
/// addressing another kind are refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// Signed counter with per-replica components
    Counter(PnCounter),
    /// High-water mark
    Watermark(MaxRegister),
    /// Add/remove set with permanent removal
    Set(TombstoneSet),
    /// Register written only by agreed decisions
    Register(Option<Value>),
    /// Register resolved by last-writer-wins tags
    LastWrite(LwwRegister),
    /// Finite-domain element folded under a table-defined operator.
    /// The operator binds on first application.
    Domain {
        /// Operator every application must use
        operator: Option<String>,
        /// Current element, once anything applied
        element: Option<u8>,
    },
}

impl Slot {
    /// Fresh bottom cell of the given kind.
    pub fn fresh(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Counter => Self::Counter(PnCounter::new()),
            SlotKind::Watermark => Self::Watermark(MaxRegister::new()),
            SlotKind::Set => Self::Set(TombstoneSet::new()),
            SlotKind::Register => Self::Register(None),
            SlotKind::LastWrite => Self::LastWrite(LwwRegister::new()),
            SlotKind::Domain => Self::Domain {
                operator: None,
                element: None,
            },
        }
    }

    /// Kind of this cell.
    pub fn kind(&self) -> SlotKind {
        match self {
            Self::Counter(_) => SlotKind::Counter,
            Self::Watermark(_) => SlotKind::Watermark,
            Self::Set(_) => SlotKind::Set,
            Self::Register(_) => SlotKind::Register,
            Self::LastWrite(_) => SlotKind::LastWrite,
            Self::Domain { .. } => SlotKind::Domain,
        }
    }
}

/// Whether a coordination-free apply changed state or hit the dedup log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    /// First application at this replica
    Applied,
    /// Operation id already in the dedup log; nothing changed
    Duplicate,
}

/// Per-key cell: slot state plus replication bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyCell {
    slot: Slot,
    /// Coordination-free operation ids already applied here.
    applied: BTreeSet<OperationId>,
    /// Highest contiguous committed position, 0 before any commit.
    committed_seq: u64,
    /// Agreed decisions waiting on earlier positions.
    pending: BTreeMap<u64, CommittedDecision>,
}

impl KeyCell {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            applied: BTreeSet::new(),
            committed_seq: 0,
            pending: BTreeMap::new(),
        }
    }

    fn checksum(&self) -> AlderResult<Digest32> {
        let mut bytes = bincode::serialize(&self.slot)
            .map_err(|e| AlderError::serialization(format!("slot checksum: {e}")))?;
        bytes.extend_from_slice(&self.committed_seq.to_le_bytes());
        Ok(hash::digest(&bytes))
    }
}

/// A replica's keyed state.
#[derive(Debug)]
pub struct ReplicaStore {
    local: ReplicaId,
    signatures: Arc<SignatureTable>,
    cells: RwLock<HashMap<Key, Arc<Mutex<KeyCell>>>>,
    /// Keys whose coordination-free path is disabled after a divergence.
    poisoned: RwLock<BTreeSet<Key>>,
}

impl ReplicaStore {
    /// Empty store for one replica.
    pub fn new(local: ReplicaId, signatures: Arc<SignatureTable>) -> Self {
        Self {
            local,
            signatures,
            cells: RwLock::new(HashMap::new()),
            poisoned: RwLock::new(BTreeSet::new()),
        }
    }

    /// Replica this store belongs to.
    pub fn local(&self) -> ReplicaId {
        self.local
    }

    /// Signature table consulted for table-defined operators.
    pub fn signatures(&self) -> &Arc<SignatureTable> {
        &self.signatures
    }

    /// Apply a coordination-free mutation.
    ///
    /// Replays of an already-applied operation id return
    /// [`ApplyStatus::Duplicate`] without touching state. Poisoned keys
    /// refuse every coordination-free apply.
    pub fn apply_free(&self, descriptor: &OperationDescriptor) -> AlderResult<ApplyStatus> {
        if self.is_poisoned(&descriptor.key) {
            return Err(AlderError::convergence_violation(descriptor.key.clone()));
        }
        let cell = self.cell(&descriptor.key, descriptor.mutation.slot_kind())?;
        let mut cell = cell.lock();
        if cell.applied.contains(&descriptor.id) {
            return Ok(ApplyStatus::Duplicate);
        }
        apply_mutation(
            &mut cell.slot,
            descriptor.origin,
            &descriptor.key,
            &descriptor.mutation,
            &self.signatures,
        )?;
        cell.applied.insert(descriptor.id);
        Ok(ApplyStatus::Applied)
    }

    /// Apply an agreed decision at its committed position.
    ///
    /// Positions at or below the cell's committed watermark are replays
    /// and no-ops. Positions past the next expected one buffer until the
    /// gap fills. Returns every decision that became applicable, in order.
    pub fn apply_decision(
        &self,
        decision: &CommittedDecision,
    ) -> AlderResult<Vec<CommittedDecision>> {
        let cell = self.cell(&decision.key, decision.kind)?;
        let mut cell = cell.lock();
        if decision.seq <= cell.committed_seq {
            return Ok(Vec::new());
        }
        if decision.seq > cell.committed_seq + 1 {
            cell.pending.insert(decision.seq, decision.clone());
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        let mut next = decision.clone();
        loop {
            self.apply_decision_effect(&mut cell, &next);
            cell.committed_seq = next.seq;
            applied.push(next);
            let next_seq = cell.committed_seq + 1;
            match cell.pending.remove(&next_seq) {
                Some(buffered) => next = buffered,
                None => break,
            }
        }
        Ok(applied)
    }

    fn apply_decision_effect(&self, cell: &mut KeyCell, decision: &CommittedDecision) {
        let Some(effect) = &decision.effect else {
            return;
        };
        // The coordinator validated the effect against its own state, so a
        // failure here means this replica's state already diverged.
        if let Err(error) = apply_mutation(
            &mut cell.slot,
            decision.origin,
            &decision.key,
            effect,
            &self.signatures,
        ) {
            tracing::error!(
                operation = %decision.operation,
                key = %decision.key,
                seq = decision.seq,
                %error,
                "committed decision failed to apply; state may have diverged"
            );
        }
    }

    /// Highest contiguous committed position for `key`.
    pub fn committed_seq(&self, key: &Key) -> u64 {
        self.cells
            .read()
            .get(key)
            .map_or(0, |cell| cell.lock().committed_seq)
    }

    /// Snapshot of the slot held at `key`.
    pub fn slot(&self, key: &Key) -> Option<Slot> {
        self.cells.read().get(key).map(|cell| cell.lock().slot.clone())
    }

    /// Keys with a cell at this replica, in order.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.cells.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Per-key state checksums for anti-entropy digests.
    ///
    /// Deterministic for a given state: two replicas that applied the same
    /// operations produce identical checksums.
    pub fn checksums(&self) -> AlderResult<BTreeMap<Key, Digest32>> {
        let cells: Vec<(Key, Arc<Mutex<KeyCell>>)> = self
            .cells
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), Arc::clone(c)))
            .collect();
        let mut out = BTreeMap::new();
        for (key, cell) in cells {
            let checksum = cell.lock().checksum()?;
            out.insert(key, checksum);
        }
        Ok(out)
    }

    /// Disable the coordination-free path for `key` after a divergence.
    pub fn poison(&self, key: &Key) {
        self.poisoned.write().insert(key.clone());
    }

    /// Whether `key` is poisoned.
    pub fn is_poisoned(&self, key: &Key) -> bool {
        self.poisoned.read().contains(key)
    }

    fn cell(&self, key: &Key, kind: SlotKind) -> AlderResult<Arc<Mutex<KeyCell>>> {
        if let Some(cell) = self.cells.read().get(key) {
            let held = cell.lock().slot.kind();
            if held != kind {
                return Err(AlderError::invalid(format!(
                    "key '{key}' holds a {held} cell, mutation addresses a {kind} cell"
                )));
            }
            return Ok(Arc::clone(cell));
        }
        let mut cells = self.cells.write();
        if let Some(cell) = cells.get(key) {
            return Ok(Arc::clone(cell));
        }
        let cell = Arc::new(Mutex::new(KeyCell::new(Slot::fresh(kind))));
        cells.insert(key.clone(), Arc::clone(&cell));
        Ok(cell)
    }
}

/// Apply one mutation to a slot. Pure with respect to everything but the
/// slot itself; all determinism of the consensus path rests on this being
/// the same function at every replica.
fn apply_mutation(
    slot: &mut Slot,
    origin: ReplicaId,
    key: &Key,
    mutation: &Mutation,
    signatures: &SignatureTable,
) -> AlderResult<()> {
    match (slot, mutation) {
        (Slot::Counter(counter), Mutation::Increment { delta }) => {
            counter.add(origin, *delta);
            Ok(())
        }
        (Slot::Counter(counter), Mutation::EscrowIncrement { delta, share, .. }) => {
            let overdrawn = if *delta >= 0 {
                counter.increments_for(&origin) + *delta as u64 > *share
            } else {
                counter.decrements_for(&origin) + delta.unsigned_abs() > *share
            };
            if overdrawn {
                return Err(AlderError::escrow_exhausted(key.clone()));
            }
            counter.add(origin, *delta);
            Ok(())
        }
        (Slot::Watermark(watermark), Mutation::Raise { value }) => {
            watermark.raise(*value);
            Ok(())
        }
        (Slot::Set(set), Mutation::Insert { element }) => {
            set.insert(element.clone());
            Ok(())
        }
        (Slot::Set(set), Mutation::TombstoneRemove { element })
        | (Slot::Set(set), Mutation::SetRemove { element }) => {
            set.remove(element.clone());
            Ok(())
        }
        (Slot::Register(contents), Mutation::Write { value }) => {
            *contents = Some(value.clone());
            Ok(())
        }
        (Slot::LastWrite(register), Mutation::WriteLww { value, tag }) => {
            register.write(*tag, value.clone());
            Ok(())
        }
        (Slot::Domain { operator, element }, Mutation::Apply { operator: name, operand }) => {
            if let Some(bound) = operator {
                if bound != name {
                    return Err(AlderError::invalid(format!(
                        "key '{key}' is bound to operator '{bound}', got '{name}'"
                    )));
                }
            }
            let table = signatures
                .lookup(name)
                .and_then(|entry| entry.table.as_ref())
                .ok_or_else(|| {
                    AlderError::invalid(format!("operator '{name}' has no signature table"))
                })?;
            if *operand as usize >= table.domain() {
                return Err(AlderError::invalid(format!(
                    "operand {operand} outside domain of operator '{name}'"
                )));
            }
            let folded = match element {
                None => *operand,
                Some(current) => table.apply(*current, *operand).ok_or_else(|| {
                    AlderError::internal(format!(
                        "element {current} outside domain of operator '{name}'"
                    ))
                })?,
            };
            *element = Some(folded);
            *operator = Some(name.clone());
            Ok(())
        }
        (Slot::Counter(_), Mutation::BoundedIncrement { .. })
        | (Slot::Counter(_), Mutation::CheckBounds { .. })
        | (Slot::Register(_), Mutation::CompareSwap { .. }) => Err(AlderError::internal(format!(
            "{} must be resolved by a coordinator before application",
            mutation.operator_name()
        ))),
        (slot, mutation) => Err(AlderError::invalid(format!(
            "{} cell at key '{key}' cannot apply {}",
            slot.kind(),
            mutation.operator_name()
        ))),
    }
}
