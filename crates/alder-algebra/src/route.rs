//! Routing: picking the execution path and estimating its cost.
//!
//! The choice is binary and mechanical: an empty universal part runs
//! coordination-free in zero rounds, anything else goes to consensus at
//! an expected cost that grows logarithmically with cluster size.

use alder_core::{Confidence, DecomposedOperation, ExecutionPath, OperationClass};
use serde::{Deserialize, Serialize};

/// Routing decision for one operation or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Path the work executes on
    pub path: ExecutionPath,
    /// Most expensive class among the routed operations
    pub class: OperationClass,
    /// Weakest confidence among the routed operations
    pub confidence: Confidence,
    /// Expected coordination rounds: zero on the free path, otherwise
    /// `max(1, ceil(log2(cluster size)))`
    pub expected_rounds: u32,
}

/// Routes decomposed operations.
#[derive(Debug, Clone, Copy)]
pub struct Router {
    replicas: usize,
}

impl Router {
    /// Router for a cluster of `replicas` members.
    pub fn new(replicas: usize) -> Self {
        Self { replicas }
    }

    /// Route one operation.
    pub fn route(&self, decomposed: &DecomposedOperation) -> Route {
        let path = if decomposed.is_coordination_free() {
            ExecutionPath::CoordinationFree
        } else {
            ExecutionPath::Consensus
        };
        Route {
            path,
            class: decomposed.classification.effective_class(),
            confidence: decomposed.classification.confidence,
            expected_rounds: self.expected_rounds(path),
        }
    }

    /// Route a batch: the maximum cost over its constituents.
    ///
    /// One universal part anywhere forces the entire batch onto the
    /// consensus path; a batch commits at the latency of its most
    /// expensive member.
    pub fn route_batch(&self, batch: &[DecomposedOperation]) -> Route {
        let all_free = batch.iter().all(DecomposedOperation::is_coordination_free);
        let path = if !batch.is_empty() && all_free {
            ExecutionPath::CoordinationFree
        } else {
            ExecutionPath::Consensus
        };
        let class = batch
            .iter()
            .map(|op| op.classification.effective_class())
            .max()
            .unwrap_or(OperationClass::Generic);
        let confidence = if batch
            .iter()
            .all(|op| op.classification.confidence == Confidence::Proven)
        {
            Confidence::Proven
        } else if batch
            .iter()
            .any(|op| op.classification.confidence == Confidence::Unknown)
        {
            Confidence::Unknown
        } else {
            Confidence::Heuristic
        };
        Route {
            path,
            class,
            confidence,
            expected_rounds: self.expected_rounds(path),
        }
    }

    fn expected_rounds(&self, path: ExecutionPath) -> u32 {
        match path {
            ExecutionPath::CoordinationFree => 0,
            ExecutionPath::Consensus => log2_ceil(self.replicas).max(1),
        }
    }
}

/// `ceil(log2(n))`, with `log2_ceil(0) == log2_ceil(1) == 0`.
fn log2_ceil(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::SignatureAnalyzer;
    use crate::decompose::Decomposer;
    use alder_core::{
        Key, Mutation, OperationDescriptor, OperationId, ReplicaId, SignatureTable,
    };
    use std::sync::Arc;

    fn split(mutation: Mutation) -> DecomposedOperation {
        let analyzer = SignatureAnalyzer::new(Arc::new(SignatureTable::new()));
        let descriptor = OperationDescriptor {
            id: OperationId::from_label("op"),
            origin: ReplicaId::from_label("a"),
            key: Key::from("k"),
            mutation,
            declared: None,
        };
        Decomposer.analyze_and_decompose(&analyzer, descriptor)
    }

    #[test]
    fn algebraic_operations_route_free_with_zero_rounds() {
        let route = Router::new(8).route(&split(Mutation::Increment { delta: 1 }));
        assert_eq!(route.path, ExecutionPath::CoordinationFree);
        assert_eq!(route.expected_rounds, 0);
        assert_eq!(route.class, OperationClass::Abelian);
    }

    #[test]
    fn generic_operations_route_to_consensus() {
        let route = Router::new(8).route(&split(Mutation::Write { value: "x".into() }));
        assert_eq!(route.path, ExecutionPath::Consensus);
        assert_eq!(route.expected_rounds, 3);
    }

    #[test]
    fn expected_rounds_grow_logarithmically() {
        let write = split(Mutation::Write { value: "x".into() });
        let cases = [(2, 1), (4, 2), (8, 3), (16, 4), (32, 5), (64, 6)];
        for (replicas, rounds) in cases {
            assert_eq!(
                Router::new(replicas).route(&write).expected_rounds,
                rounds,
                "cluster of {replicas}"
            );
        }
        // Odd sizes round up.
        assert_eq!(Router::new(5).route(&write).expected_rounds, 3);
        // A single replica still pays one round to itself.
        assert_eq!(Router::new(1).route(&write).expected_rounds, 1);
    }

    #[test]
    fn one_universal_part_forces_the_whole_batch_to_consensus() {
        let batch = vec![
            split(Mutation::Increment { delta: 1 }),
            split(Mutation::Write { value: "x".into() }),
        ];
        let route = Router::new(4).route_batch(&batch);
        assert_eq!(route.path, ExecutionPath::Consensus);
        assert_eq!(route.class, OperationClass::Generic);
        assert_eq!(route.expected_rounds, 2);
    }

    #[test]
    fn all_free_batches_stay_free() {
        let batch = vec![
            split(Mutation::Increment { delta: 1 }),
            split(Mutation::Raise { value: 10 }),
        ];
        let route = Router::new(4).route_batch(&batch);
        assert_eq!(route.path, ExecutionPath::CoordinationFree);
        assert_eq!(route.expected_rounds, 0);
        // The batch reports its most expensive class.
        assert_eq!(route.class, OperationClass::Abelian);
    }

    #[test]
    fn empty_batches_route_conservatively() {
        let route = Router::new(4).route_batch(&[]);
        assert_eq!(route.path, ExecutionPath::Consensus);
        assert_eq!(route.class, OperationClass::Generic);
    }

    #[test]
    fn batch_confidence_is_the_weakest_member() {
        let batch = vec![
            split(Mutation::Increment { delta: 1 }),
            split(Mutation::Apply { operator: "merge-x".into(), operand: 0 }),
        ];
        assert_eq!(Router::new(4).route_batch(&batch).confidence, Confidence::Heuristic);
    }

    #[test]
    fn log2_ceil_table() {
        assert_eq!(log2_ceil(0), 0);
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(3), 2);
        assert_eq!(log2_ceil(64), 6);
        assert_eq!(log2_ceil(65), 7);
    }
}
