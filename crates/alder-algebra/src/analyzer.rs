//! Operation classification.
//!
//! The analyzer establishes the four algebraic properties for one
//! operation and reports how it knows. Proven knowledge comes from three
//! sources: intrinsic knowledge of the built-in mutations, caller
//! declarations, and exhaustive checks of finite operator tables. Name
//! patterns only ever yield [`Confidence::Heuristic`], and heuristic
//! results are routed as if they were `Generic`; their suspected class is
//! consumed solely by the restructuring advisor.

use alder_core::{
    Classification, Confidence, Mutation, OperationDescriptor, PropertySet, SignatureTable,
};
use std::sync::Arc;

/// Substrings that suggest a semilattice-like operator.
const SEMILATTICE_HINTS: &[&str] = &["max", "min", "union", "merge", "join"];

/// Substrings that suggest an abelian-group-like operator.
const ABELIAN_HINTS: &[&str] = &["add", "incr", "sum", "count", "tally"];

/// Classifies operations against intrinsic knowledge and the signature
/// table.
#[derive(Debug, Clone)]
pub struct SignatureAnalyzer {
    signatures: Arc<SignatureTable>,
}

impl SignatureAnalyzer {
    /// Analyzer over a signature table.
    pub fn new(signatures: Arc<SignatureTable>) -> Self {
        Self { signatures }
    }

    /// The signature table this analyzer consults.
    pub fn signatures(&self) -> &Arc<SignatureTable> {
        &self.signatures
    }

    /// Classify one operation.
    ///
    /// Sources are consulted in trust order: intrinsic knowledge, the
    /// caller's declaration on the descriptor, a declaration in the
    /// signature table, an exhaustively checked operator table, and
    /// finally name heuristics. The first source that answers wins.
    pub fn classify(&self, descriptor: &OperationDescriptor) -> Classification {
        if let Some(properties) = intrinsic_properties(&descriptor.mutation) {
            return Classification::proven(properties);
        }
        if let Some(properties) = descriptor.declared {
            return Classification::proven(properties);
        }

        let operator = descriptor.mutation.operator_name();
        if let Some(entry) = self.signatures.lookup(operator) {
            if let Some(properties) = entry.declared {
                return Classification::proven(properties);
            }
            if let Some(table) = &entry.table {
                return Classification::proven(table.properties());
            }
        }

        if let Some(properties) = heuristic_properties(operator) {
            let classification = Classification::heuristic(properties);
            tracing::debug!(
                operator,
                suspected = %classification.class,
                "operator classified by name heuristic; routing as generic"
            );
            return classification;
        }

        Classification::unknown()
    }
}

/// Properties of the built-in mutations. `Apply` has none: its algebra
/// comes entirely from the signature table.
fn intrinsic_properties(mutation: &Mutation) -> Option<PropertySet> {
    match mutation {
        Mutation::Raise { .. }
        | Mutation::Insert { .. }
        | Mutation::TombstoneRemove { .. }
        | Mutation::WriteLww { .. } => Some(PropertySet::SEMILATTICE),
        Mutation::Increment { .. } | Mutation::EscrowIncrement { .. } => {
            Some(PropertySet::ABELIAN)
        }
        Mutation::Write { .. }
        | Mutation::CompareSwap { .. }
        | Mutation::SetRemove { .. }
        | Mutation::BoundedIncrement { .. }
        | Mutation::CheckBounds { .. } => Some(PropertySet::NONE),
        Mutation::Apply { .. } => None,
    }
}

/// Name-pattern fallback for undeclared custom operators.
fn heuristic_properties(operator: &str) -> Option<PropertySet> {
    let name = operator.to_ascii_lowercase();
    if SEMILATTICE_HINTS.iter().any(|hint| name.contains(hint)) {
        return Some(PropertySet::SEMILATTICE);
    }
    if ABELIAN_HINTS.iter().any(|hint| name.contains(hint)) {
        return Some(PropertySet::ABELIAN);
    }
    None
}
