//! Coordinator-side resolution of operations into concrete decisions.
//!
//! Guards are evaluated exactly once, against the coordinator's state at
//! the key's serialization point. The resulting decision carries a
//! concrete effect (or none, when the guard refused) that every replica
//! applies verbatim, which is what keeps consensus application
//! deterministic even while coordination-free operations interleave
//! differently at each replica.

use alder_core::{
    AlderError, CommittedDecision, Mutation, OpOutcome, OperationDescriptor, ReplicaStore, Slot,
    Value,
};

/// Resolve an operation into the decision proposed for position `seq`.
pub fn resolve(store: &ReplicaStore, descriptor: &OperationDescriptor, seq: u64) -> CommittedDecision {
    let slot = store.slot(&descriptor.key);
    // Cells created by this decision take the mutation's kind; existing
    // cells keep theirs so application never faults on a mismatch.
    let kind = slot
        .as_ref()
        .map_or_else(|| descriptor.mutation.slot_kind(), Slot::kind);

    let (effect, outcome) = if slot
        .as_ref()
        .is_some_and(|s| s.kind() != descriptor.mutation.slot_kind())
    {
        let reason = format!(
            "key '{}' holds a {} cell, {} addresses a {} cell",
            descriptor.key,
            kind,
            descriptor.mutation.operator_name(),
            descriptor.mutation.slot_kind()
        );
        (None, OpOutcome::Rejected { reason })
    } else {
        resolve_effect(store, descriptor, slot.as_ref())
    };

    CommittedDecision {
        operation: descriptor.id,
        origin: descriptor.origin,
        key: descriptor.key.clone(),
        kind,
        seq,
        effect,
        outcome,
    }
}

fn resolve_effect(
    store: &ReplicaStore,
    descriptor: &OperationDescriptor,
    slot: Option<&Slot>,
) -> (Option<Mutation>, OpOutcome) {
    match &descriptor.mutation {
        Mutation::BoundedIncrement { delta, floor, ceiling } => {
            let next = i128::from(counter_value(slot)) + i128::from(*delta);
            if next < i128::from(*floor) || next > i128::from(*ceiling) {
                let reason = format!(
                    "increment to {next} leaves bounds [{floor}, {ceiling}]"
                );
                (None, OpOutcome::Rejected { reason })
            } else {
                (Some(Mutation::Increment { delta: *delta }), OpOutcome::Applied)
            }
        }
        Mutation::CheckBounds { floor, ceiling } => {
            let current = counter_value(slot);
            if current < *floor || current > *ceiling {
                let reason = format!("counter at {current} outside bounds [{floor}, {ceiling}]");
                (None, OpOutcome::Rejected { reason })
            } else {
                (None, OpOutcome::Applied)
            }
        }
        Mutation::EscrowIncrement { delta, floor, ceiling, share } => {
            // Admission against this coordinator's merged view of the
            // origin's spend; the granted effect is an unconditional
            // increment so replicas need not re-check.
            let spent = match slot {
                Some(Slot::Counter(counter)) if *delta >= 0 => {
                    counter.increments_for(&descriptor.origin)
                }
                Some(Slot::Counter(counter)) => counter.decrements_for(&descriptor.origin),
                _ => 0,
            };
            if spent + delta.unsigned_abs() > *share {
                let reason = format!(
                    "origin spent {spent} of its {share} escrow share on [{floor}, {ceiling}]"
                );
                (None, OpOutcome::Rejected { reason })
            } else {
                (Some(Mutation::Increment { delta: *delta }), OpOutcome::Applied)
            }
        }
        Mutation::CompareSwap { expect, update } => match register_value(slot) {
            Some(current) if current == *expect => (
                Some(Mutation::Write { value: update.clone() }),
                OpOutcome::Applied,
            ),
            Some(current) => {
                let reason = format!("register holds {current}, expected {expect}");
                (None, OpOutcome::Rejected { reason })
            }
            None => {
                let reason = format!("register is empty, expected {expect}");
                (None, OpOutcome::Rejected { reason })
            }
        },
        Mutation::SetRemove { element } => {
            let present = matches!(slot, Some(Slot::Set(set)) if set.contains(element));
            if present {
                // The agreed removal applies as a tombstone so it still
                // commutes with concurrent coordination-free inserts.
                (
                    Some(Mutation::SetRemove { element: element.clone() }),
                    OpOutcome::Applied,
                )
            } else {
                let reason = format!("element {element} not present at the removal's position");
                (None, OpOutcome::Rejected { reason })
            }
        }
        Mutation::Apply { operator, operand } => {
            match validate_apply(store, slot, operator, *operand) {
                Ok(()) => (Some(descriptor.mutation.clone()), OpOutcome::Applied),
                Err(error) => (None, OpOutcome::Rejected { reason: error.to_string() }),
            }
        }
        // Everything else applies unconditionally; these reach consensus
        // only when a batch drags them along.
        mutation => (Some(mutation.clone()), OpOutcome::Applied),
    }
}

fn counter_value(slot: Option<&Slot>) -> i64 {
    match slot {
        Some(Slot::Counter(counter)) => counter.value(),
        _ => 0,
    }
}

fn register_value(slot: Option<&Slot>) -> Option<Value> {
    match slot {
        Some(Slot::Register(value)) => value.clone(),
        _ => None,
    }
}

fn validate_apply(
    store: &ReplicaStore,
    slot: Option<&Slot>,
    operator: &str,
    operand: u8,
) -> Result<(), AlderError> {
    if let Some(Slot::Domain { operator: Some(bound), .. }) = slot {
        if bound != operator {
            return Err(AlderError::invalid(format!(
                "cell is bound to operator '{bound}', got '{operator}'"
            )));
        }
    }
    let signatures = store.signatures();
    let table = signatures
        .lookup(operator)
        .and_then(|entry| entry.table.as_ref())
        .ok_or_else(|| {
            AlderError::invalid(format!("operator '{operator}' has no signature table"))
        })?;
    if usize::from(operand) >= table.domain() {
        return Err(AlderError::invalid(format!(
            "operand {operand} outside domain of operator '{operator}'"
        )));
    }
    Ok(())
}
