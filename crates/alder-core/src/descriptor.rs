//! The operation algebra: mutations, property sets, and classifications.
//!
//! A mutation names what a caller wants done to one key. The classifier in
//! `alder-algebra` maps each mutation to a [`PropertySet`], collapses that
//! into an [`OperationClass`], and tags the result with how it knows
//! ([`Confidence`]). Routing trusts only proven results; everything else
//! pays for coordination.

use crate::identifiers::{Key, OperationId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four algebraic properties classification reasons about.
///
/// All properties are judged over concurrent applications to the same key:
/// `commutative` means `apply(a, apply(b, s)) == apply(b, apply(a, s))` for
/// any state `s`, and so on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertySet {
    /// Order of application does not matter
    pub commutative: bool,
    /// Grouping of applications does not matter
    pub associative: bool,
    /// Duplicate application does not matter
    pub idempotent: bool,
    /// Every application can be undone by another application
    pub invertible: bool,
}

impl PropertySet {
    /// Commutative, associative, and idempotent: mergeable in any order,
    /// any number of times.
    pub const SEMILATTICE: Self = Self {
        commutative: true,
        associative: true,
        idempotent: true,
        invertible: false,
    };

    /// Commutative and associative with inverses, but not idempotent:
    /// order-free, duplicate-sensitive.
    pub const ABELIAN: Self = Self {
        commutative: true,
        associative: true,
        idempotent: false,
        invertible: true,
    };

    /// No algebraic structure established.
    pub const NONE: Self = Self {
        commutative: false,
        associative: false,
        idempotent: false,
        invertible: false,
    };

    /// Collapse this property set into an operation class.
    ///
    /// Semilattice subsumes Abelian when both match, so it is checked first.
    pub fn classify(&self) -> OperationClass {
        if self.commutative && self.associative && self.idempotent {
            OperationClass::Semilattice
        } else if self.commutative && self.associative && self.invertible {
            OperationClass::Abelian
        } else {
            OperationClass::Generic
        }
    }
}

/// Coordination class of an operation.
///
/// Variants are ordered by coordination cost, so the most expensive class
/// in a batch is simply the `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationClass {
    /// Mergeable in any order, any number of times
    Semilattice,
    /// Order-free but duplicate-sensitive
    Abelian,
    /// Needs an agreed position in the key's history
    Generic,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semilattice => f.write_str("semilattice"),
            Self::Abelian => f.write_str("abelian"),
            Self::Generic => f.write_str("generic"),
        }
    }
}

/// How a classification was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    /// Intrinsic knowledge, a caller declaration, or an exhaustive
    /// finite-table check
    Proven,
    /// Pattern-matched from the operator's name
    Heuristic,
    /// Nothing established
    Unknown,
}

/// A property set, its class, and how it was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Properties established for the operation
    pub properties: PropertySet,
    /// Class implied by those properties
    pub class: OperationClass,
    /// How the properties were established
    pub confidence: Confidence,
}

impl Classification {
    /// A proven classification derived from `properties`.
    pub fn proven(properties: PropertySet) -> Self {
        Self {
            properties,
            class: properties.classify(),
            confidence: Confidence::Proven,
        }
    }

    /// A heuristic classification derived from `properties`.
    pub fn heuristic(properties: PropertySet) -> Self {
        Self {
            properties,
            class: properties.classify(),
            confidence: Confidence::Heuristic,
        }
    }

    /// Nothing established.
    pub fn unknown() -> Self {
        Self {
            properties: PropertySet::NONE,
            class: OperationClass::Generic,
            confidence: Confidence::Unknown,
        }
    }

    /// Class used for routing. Results that are not proven route as
    /// `Generic` regardless of the suspected class.
    pub fn effective_class(&self) -> OperationClass {
        match self.confidence {
            Confidence::Proven => self.class,
            Confidence::Heuristic | Confidence::Unknown => OperationClass::Generic,
        }
    }
}

/// Total-order tag for last-writer-wins registers.
///
/// Ordered by `(stamp, replica)` so writes with equal stamps still resolve
/// identically at every replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LwwTag {
    /// Microsecond timestamp taken at submission
    pub stamp: u64,
    /// Submitting replica, breaking stamp ties
    pub replica: ReplicaId,
}

impl LwwTag {
    /// Create a tag from a stamp and the submitting replica.
    pub fn new(stamp: u64, replica: ReplicaId) -> Self {
        Self { stamp, replica }
    }
}

/// Kinds of cell a key can hold. Fixed by the first mutation applied to
/// the key; later mutations of another kind are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// Signed counter with per-replica components
    Counter,
    /// High-water mark that only moves up
    Watermark,
    /// Add/remove set with permanent removal
    Set,
    /// Register written only at agreed positions
    Register,
    /// Register resolved by last-writer-wins tags
    LastWrite,
    /// Element of a finite domain folded under a table-defined operator
    Domain,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter => f.write_str("counter"),
            Self::Watermark => f.write_str("watermark"),
            Self::Set => f.write_str("set"),
            Self::Register => f.write_str("register"),
            Self::LastWrite => f.write_str("last-write"),
            Self::Domain => f.write_str("domain"),
        }
    }
}

/// A state mutation addressed to a single key.
///
/// These variants are the operation vocabulary the classifier has intrinsic
/// algebraic knowledge of, plus [`Mutation::Apply`] for custom operators
/// declared through the signature table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Add `delta` to a counter cell
    Increment {
        /// Signed amount to add
        delta: i64,
    },
    /// Add `delta` against a per-replica escrow allocation of the headroom
    /// between `floor` and `ceiling`
    EscrowIncrement {
        /// Signed amount to add
        delta: i64,
        /// Lower bound the counter must respect
        floor: i64,
        /// Upper bound the counter must respect
        ceiling: i64,
        /// Amount this replica may spend in each direction
        share: u64,
    },
    /// Raise a watermark cell to at least `value`
    Raise {
        /// New candidate high-water mark
        value: i64,
    },
    /// Add an element to a set cell
    Insert {
        /// Element to add
        element: crate::value::Value,
    },
    /// Remove an element permanently; removed elements cannot return
    TombstoneRemove {
        /// Element to tombstone
        element: crate::value::Value,
    },
    /// Remove an element at an agreed position in the key's history
    SetRemove {
        /// Element to remove
        element: crate::value::Value,
    },
    /// Overwrite a register cell at an agreed position
    Write {
        /// New contents
        value: crate::value::Value,
    },
    /// Overwrite a last-writer-wins register; the greatest tag wins
    WriteLww {
        /// New contents
        value: crate::value::Value,
        /// Tag deciding the winner among concurrent writes
        tag: LwwTag,
    },
    /// Overwrite only if the current value equals `expect`
    CompareSwap {
        /// Value the register must currently hold
        expect: crate::value::Value,
        /// Replacement if the guard holds
        update: crate::value::Value,
    },
    /// Add `delta` only while the result stays within `[floor, ceiling]`
    BoundedIncrement {
        /// Signed amount to add
        delta: i64,
        /// Lower bound the counter must respect
        floor: i64,
        /// Upper bound the counter must respect
        ceiling: i64,
    },
    /// Guard half of a bounded update: assert the counter stays within
    /// `[floor, ceiling]` once the paired delta lands
    CheckBounds {
        /// Lower bound to assert
        floor: i64,
        /// Upper bound to assert
        ceiling: i64,
    },
    /// Apply a custom binary operator from the signature table to a
    /// domain cell
    Apply {
        /// Operator name, resolved through the signature table
        operator: String,
        /// Right-hand operand, an element of the operator's domain
        operand: u8,
    },
}

impl Mutation {
    /// Operator name used for signature-table lookups, advice, and
    /// telemetry.
    pub fn operator_name(&self) -> &str {
        match self {
            Self::Increment { .. } => "increment",
            Self::EscrowIncrement { .. } => "escrow-increment",
            Self::Raise { .. } => "raise",
            Self::Insert { .. } => "insert",
            Self::TombstoneRemove { .. } => "tombstone-remove",
            Self::SetRemove { .. } => "set-remove",
            Self::Write { .. } => "write",
            Self::WriteLww { .. } => "write-lww",
            Self::CompareSwap { .. } => "compare-swap",
            Self::BoundedIncrement { .. } => "bounded-increment",
            Self::CheckBounds { .. } => "check-bounds",
            Self::Apply { operator, .. } => operator,
        }
    }

    /// Kind of cell this mutation addresses.
    pub fn slot_kind(&self) -> SlotKind {
        match self {
            Self::Increment { .. }
            | Self::EscrowIncrement { .. }
            | Self::BoundedIncrement { .. }
            | Self::CheckBounds { .. } => SlotKind::Counter,
            Self::Raise { .. } => SlotKind::Watermark,
            Self::Insert { .. } | Self::TombstoneRemove { .. } | Self::SetRemove { .. } => {
                SlotKind::Set
            }
            Self::Write { .. } | Self::CompareSwap { .. } => SlotKind::Register,
            Self::WriteLww { .. } => SlotKind::LastWrite,
            Self::Apply { .. } => SlotKind::Domain,
        }
    }
}

/// A mutating operation as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Unique id assigned at submission
    pub id: OperationId,
    /// Replica the operation was submitted at
    pub origin: ReplicaId,
    /// Key the mutation addresses
    pub key: Key,
    /// The mutation itself
    pub mutation: Mutation,
    /// Caller-declared properties, trusted over any heuristic
    pub declared: Option<PropertySet>,
}

impl OperationDescriptor {
    /// Create a descriptor with a fresh operation id.
    pub fn new(origin: ReplicaId, key: Key, mutation: Mutation) -> Self {
        Self {
            id: OperationId::new(),
            origin,
            key,
            mutation,
            declared: None,
        }
    }

    /// Attach caller-declared algebraic properties.
    pub fn with_declared(mut self, properties: PropertySet) -> Self {
        self.declared = Some(properties);
        self
    }
}

/// An operation split into its coordination-free and agreement-requiring
/// parts.
///
/// Applying every existential part and then every universal part at an
/// agreed position reproduces the original mutation's effect; the split
/// never invents or drops work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecomposedOperation {
    /// The operation as submitted
    pub descriptor: OperationDescriptor,
    /// Classification the split was derived from
    pub classification: Classification,
    /// Parts that commute with concurrent siblings and apply locally
    pub existential: Vec<Mutation>,
    /// Parts that need an agreed position in the key's history
    pub universal: Vec<Mutation>,
}

impl DecomposedOperation {
    /// Whether the whole operation can run without coordination.
    pub fn is_coordination_free(&self) -> bool {
        self.universal.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_sets_collapse_to_classes() {
        assert_eq!(PropertySet::SEMILATTICE.classify(), OperationClass::Semilattice);
        assert_eq!(PropertySet::ABELIAN.classify(), OperationClass::Abelian);
        assert_eq!(PropertySet::NONE.classify(), OperationClass::Generic);

        // Idempotence wins over invertibility when both hold.
        let both = PropertySet {
            commutative: true,
            associative: true,
            idempotent: true,
            invertible: true,
        };
        assert_eq!(both.classify(), OperationClass::Semilattice);

        // Commutative alone is not enough.
        let c_only = PropertySet {
            commutative: true,
            ..PropertySet::NONE
        };
        assert_eq!(c_only.classify(), OperationClass::Generic);
    }

    #[test]
    fn unproven_classifications_route_as_generic() {
        let heuristic = Classification::heuristic(PropertySet::SEMILATTICE);
        assert_eq!(heuristic.class, OperationClass::Semilattice);
        assert_eq!(heuristic.effective_class(), OperationClass::Generic);

        assert_eq!(Classification::unknown().effective_class(), OperationClass::Generic);

        let proven = Classification::proven(PropertySet::ABELIAN);
        assert_eq!(proven.effective_class(), OperationClass::Abelian);
    }

    #[test]
    fn class_ordering_matches_coordination_cost() {
        assert!(OperationClass::Semilattice < OperationClass::Abelian);
        assert!(OperationClass::Abelian < OperationClass::Generic);
    }

    #[test]
    fn lww_tags_order_by_stamp_then_replica() {
        let a = ReplicaId::from_label("a");
        let b = ReplicaId::from_label("b");
        assert!(LwwTag::new(1, a) < LwwTag::new(2, a));
        assert!(LwwTag::new(5, a) != LwwTag::new(5, b));
        // Equal stamps resolve the same way everywhere.
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        assert!(LwwTag::new(5, lo) < LwwTag::new(5, hi));
    }

    #[test]
    fn slot_kinds_follow_the_mutation() {
        assert_eq!(Mutation::Increment { delta: 1 }.slot_kind(), SlotKind::Counter);
        assert_eq!(Mutation::Raise { value: 9 }.slot_kind(), SlotKind::Watermark);
        assert_eq!(
            Mutation::Write { value: "x".into() }.slot_kind(),
            SlotKind::Register
        );
        assert_eq!(
            Mutation::Apply { operator: "merge-rank".into(), operand: 2 }.slot_kind(),
            SlotKind::Domain
        );
    }

    #[test]
    fn custom_operator_names_pass_through() {
        let apply = Mutation::Apply { operator: "merge-rank".into(), operand: 0 };
        assert_eq!(apply.operator_name(), "merge-rank");
        assert_eq!(Mutation::Increment { delta: 1 }.operator_name(), "increment");
    }
}
