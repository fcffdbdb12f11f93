//! Existential/universal decomposition.
//!
//! An operation's existential part is satisfiable from local knowledge
//! alone: it commutes with everything that can run concurrently, so any
//! replica may apply it immediately. The universal part quantifies over
//! the whole key history and needs an agreed position. The split is
//! conservative: when no safe split is known, the entire operation is
//! universal.

use crate::analyzer::SignatureAnalyzer;
use alder_core::{
    AlderError, AlderResult, Classification, DecomposedOperation, Mutation, OperationClass,
    OperationDescriptor,
};

/// Splits classified operations into coordination-free and
/// agreement-requiring parts.
#[derive(Debug, Clone)]
pub struct Decomposer;

impl Decomposer {
    /// Split `descriptor` according to its classification.
    ///
    /// Operations whose effective class is algebraic are entirely
    /// existential. `BoundedIncrement` is the one mixed case among the
    /// built-ins: its delta commutes while its bounds check does not.
    /// Everything else generic is entirely universal.
    pub fn decompose(
        &self,
        descriptor: OperationDescriptor,
        classification: Classification,
    ) -> DecomposedOperation {
        let (existential, universal) = match (&descriptor.mutation, classification.effective_class())
        {
            (mutation, OperationClass::Semilattice | OperationClass::Abelian) => {
                (vec![mutation.clone()], Vec::new())
            }
            (Mutation::BoundedIncrement { delta, floor, ceiling }, OperationClass::Generic) => (
                vec![Mutation::Increment { delta: *delta }],
                vec![Mutation::CheckBounds { floor: *floor, ceiling: *ceiling }],
            ),
            (mutation, OperationClass::Generic) => (Vec::new(), vec![mutation.clone()]),
        };
        DecomposedOperation {
            descriptor,
            classification,
            existential,
            universal,
        }
    }

    /// Convenience: classify and split in one call.
    pub fn analyze_and_decompose(
        &self,
        analyzer: &SignatureAnalyzer,
        descriptor: OperationDescriptor,
    ) -> DecomposedOperation {
        let classification = analyzer.classify(&descriptor);
        self.decompose(descriptor, classification)
    }
}

/// Rebuild the original mutation from a split.
///
/// Inverse of [`Decomposer::decompose`]: recombining the parts in order
/// must reproduce the submitted mutation exactly, proving the split
/// neither invents nor drops work.
pub fn recompose(decomposed: &DecomposedOperation) -> AlderResult<Mutation> {
    match (decomposed.existential.as_slice(), decomposed.universal.as_slice()) {
        ([mutation], []) | ([], [mutation]) => Ok(mutation.clone()),
        (
            [Mutation::Increment { delta }],
            [Mutation::CheckBounds { floor, ceiling }],
        ) => Ok(Mutation::BoundedIncrement {
            delta: *delta,
            floor: *floor,
            ceiling: *ceiling,
        }),
        _ => Err(AlderError::internal(format!(
            "operation {} has an unrecognized split",
            decomposed.descriptor.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alder_core::{Key, OperationId, PropertySet, ReplicaId, SignatureTable};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn descriptor(mutation: Mutation) -> OperationDescriptor {
        OperationDescriptor {
            id: OperationId::from_label("op"),
            origin: ReplicaId::from_label("a"),
            key: Key::from("k"),
            mutation,
            declared: None,
        }
    }

    fn split(mutation: Mutation) -> DecomposedOperation {
        let analyzer = SignatureAnalyzer::new(Arc::new(SignatureTable::new()));
        Decomposer.analyze_and_decompose(&analyzer, descriptor(mutation))
    }

    #[test]
    fn algebraic_operations_are_entirely_existential() {
        let decomposed = split(Mutation::Increment { delta: 4 });
        assert!(decomposed.is_coordination_free());
        assert_eq!(decomposed.existential, vec![Mutation::Increment { delta: 4 }]);

        let decomposed = split(Mutation::Insert { element: "x".into() });
        assert!(decomposed.is_coordination_free());
    }

    #[test]
    fn bounded_increment_splits_delta_from_guard() {
        let decomposed = split(Mutation::BoundedIncrement { delta: 3, floor: 0, ceiling: 10 });
        assert_eq!(decomposed.existential, vec![Mutation::Increment { delta: 3 }]);
        assert_eq!(
            decomposed.universal,
            vec![Mutation::CheckBounds { floor: 0, ceiling: 10 }]
        );
        assert!(!decomposed.is_coordination_free());
    }

    #[test]
    fn unsplittable_generics_are_entirely_universal() {
        for mutation in [
            Mutation::Write { value: "x".into() },
            Mutation::CompareSwap { expect: "a".into(), update: "b".into() },
            Mutation::SetRemove { element: "x".into() },
        ] {
            let decomposed = split(mutation.clone());
            assert!(decomposed.existential.is_empty());
            assert_eq!(decomposed.universal, vec![mutation]);
        }
    }

    #[test]
    fn unproven_operations_decompose_conservatively() {
        // Heuristically semilattice, but not proven, so nothing may run free.
        let decomposed = split(Mutation::Apply { operator: "merge-x".into(), operand: 1 });
        assert!(decomposed.existential.is_empty());
        assert_eq!(decomposed.universal.len(), 1);
    }

    #[test]
    fn declared_operations_decompose_by_their_declaration() {
        let analyzer = SignatureAnalyzer::new(Arc::new(SignatureTable::new()));
        let described = descriptor(Mutation::Apply { operator: "op".into(), operand: 1 })
            .with_declared(PropertySet::SEMILATTICE);
        let decomposed = Decomposer.analyze_and_decompose(&analyzer, described);
        assert!(decomposed.is_coordination_free());
    }

    fn arb_mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            (-50i64..50).prop_map(|delta| Mutation::Increment { delta }),
            (-50i64..50).prop_map(|value| Mutation::Raise { value }),
            (-20i64..20).prop_map(|n| Mutation::Insert { element: alder_core::Value::Int(n) }),
            (-20i64..20).prop_map(|n| Mutation::SetRemove { element: alder_core::Value::Int(n) }),
            (-20i64..20).prop_map(|n| Mutation::Write { value: alder_core::Value::Int(n) }),
            ((-20i64..0), (1i64..40), (-10i64..10)).prop_map(|(floor, span, delta)| {
                Mutation::BoundedIncrement { delta, floor, ceiling: floor + span }
            }),
            "[a-z]{3,10}".prop_map(|operator| Mutation::Apply { operator, operand: 0 }),
        ]
    }

    proptest! {
        /// Recomposition law: the split always reassembles into exactly
        /// the submitted mutation.
        #[test]
        fn recompose_inverts_decompose(mutation in arb_mutation()) {
            let decomposed = split(mutation.clone());
            prop_assert_eq!(recompose(&decomposed).expect("recompose"), mutation);
        }

        /// Nothing is ever both existential and universal, and no part
        /// goes missing.
        #[test]
        fn splits_partition_the_operation(mutation in arb_mutation()) {
            let decomposed = split(mutation);
            prop_assert!(decomposed.existential.len() + decomposed.universal.len() >= 1);
            prop_assert!(decomposed.existential.iter().all(|m| !decomposed.universal.contains(m)));
        }
    }
}
