//! Join-semilattice building blocks for coordination-free cells.
//!
//! Every type here carries a `join` that is commutative, associative, and
//! idempotent, so replicas can merge in any order, any number of times,
//! and still agree. Mutators are written as joins with a singleton state
//! wherever the operation is itself a join.

use crate::descriptor::LwwTag;
use crate::identifiers::ReplicaId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Least element of a lattice.
pub trait Bottom {
    /// The least element.
    fn bottom() -> Self;
}

/// Merge under a partial order; the result is the least upper bound.
pub trait JoinSemilattice {
    /// Least upper bound of `self` and `other`.
    fn join(&self, other: &Self) -> Self;

    /// Merge `other` into `self`.
    fn join_assign(&mut self, other: &Self)
    where
        Self: Sized,
    {
        *self = self.join(other);
    }
}

/// Positive-negative counter keyed by contributing replica.
///
/// Each replica only grows its own components, so pointwise max is a valid
/// join and state merges survive duplication even though increments do not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    increments: BTreeMap<ReplicaId, u64>,
    decrements: BTreeMap<ReplicaId, u64>,
}

impl PnCounter {
    /// An empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value: total increments minus total decrements.
    pub fn value(&self) -> i64 {
        let up: u64 = self.increments.values().sum();
        let down: u64 = self.decrements.values().sum();
        (up as i128 - down as i128) as i64
    }

    /// Apply a signed delta on behalf of `replica`.
    pub fn add(&mut self, replica: ReplicaId, delta: i64) {
        if delta >= 0 {
            *self.increments.entry(replica).or_default() += delta as u64;
        } else {
            *self.decrements.entry(replica).or_default() += delta.unsigned_abs();
        }
    }

    /// Total positive contribution recorded for `replica`.
    pub fn increments_for(&self, replica: &ReplicaId) -> u64 {
        self.increments.get(replica).copied().unwrap_or(0)
    }

    /// Total negative contribution recorded for `replica`.
    pub fn decrements_for(&self, replica: &ReplicaId) -> u64 {
        self.decrements.get(replica).copied().unwrap_or(0)
    }
}

impl Bottom for PnCounter {
    fn bottom() -> Self {
        Self::default()
    }
}

impl JoinSemilattice for PnCounter {
    fn join(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (replica, count) in &other.increments {
            let slot = out.increments.entry(*replica).or_default();
            *slot = (*slot).max(*count);
        }
        for (replica, count) in &other.decrements {
            let slot = out.decrements.entry(*replica).or_default();
            *slot = (*slot).max(*count);
        }
        out
    }
}

/// Register that only moves up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxRegister {
    value: Option<i64>,
}

impl MaxRegister {
    /// An unset register.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the register to at least `value`.
    pub fn raise(&mut self, value: i64) {
        self.join_assign(&Self { value: Some(value) });
    }

    /// Current high-water mark, if any value was ever raised.
    pub fn value(&self) -> Option<i64> {
        self.value
    }
}

impl Bottom for MaxRegister {
    fn bottom() -> Self {
        Self::default()
    }
}

impl JoinSemilattice for MaxRegister {
    fn join(&self, other: &Self) -> Self {
        Self {
            value: self.value.max(other.value),
        }
    }
}

/// Add/remove set where removal is permanent.
///
/// An element present in both halves counts as removed, regardless of the
/// order the halves merged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneSet {
    added: BTreeSet<Value>,
    removed: BTreeSet<Value>,
}

impl TombstoneSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element. Re-adding a tombstoned element has no effect on
    /// membership.
    pub fn insert(&mut self, element: Value) {
        self.added.insert(element);
    }

    /// Tombstone an element; it can never return.
    pub fn remove(&mut self, element: Value) {
        self.removed.insert(element);
    }

    /// Whether `element` is currently a member.
    pub fn contains(&self, element: &Value) -> bool {
        self.added.contains(element) && !self.removed.contains(element)
    }

    /// Live members, in value order.
    pub fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.added.iter().filter(|e| !self.removed.contains(*e))
    }

    /// Number of live members.
    pub fn len(&self) -> usize {
        self.elements().count()
    }

    /// Whether no live members remain.
    pub fn is_empty(&self) -> bool {
        self.elements().next().is_none()
    }
}

impl Bottom for TombstoneSet {
    fn bottom() -> Self {
        Self::default()
    }
}

impl JoinSemilattice for TombstoneSet {
    fn join(&self, other: &Self) -> Self {
        Self {
            added: self.added.union(&other.added).cloned().collect(),
            removed: self.removed.union(&other.removed).cloned().collect(),
        }
    }
}

/// Last-writer-wins register ordered by [`LwwTag`].
///
/// Tags are unique per write, so a tie means both sides already hold the
/// same write and either may win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister {
    value: Option<(LwwTag, Value)>,
}

impl LwwRegister {
    /// An unwritten register.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` under `tag`; older tags lose.
    pub fn write(&mut self, tag: LwwTag, value: Value) {
        self.join_assign(&Self {
            value: Some((tag, value)),
        });
    }

    /// Current contents, if ever written.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref().map(|(_, v)| v)
    }

    /// Tag of the winning write.
    pub fn tag(&self) -> Option<LwwTag> {
        self.value.as_ref().map(|(t, _)| *t)
    }
}

impl Bottom for LwwRegister {
    fn bottom() -> Self {
        Self::default()
    }
}

impl JoinSemilattice for LwwRegister {
    fn join(&self, other: &Self) -> Self {
        match (&self.value, &other.value) {
            (Some((self_tag, _)), Some((other_tag, _))) => {
                if other_tag > self_tag {
                    other.clone()
                } else {
                    self.clone()
                }
            }
            (None, Some(_)) => other.clone(),
            _ => self.clone(),
        }
    }
}
