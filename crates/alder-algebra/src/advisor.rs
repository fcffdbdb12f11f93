//! Restructuring advice for operations stuck on the consensus path.
//!
//! The advisor never changes live routing. It inspects a generic
//! operation, walks a fixed rule catalog, and hands back the first
//! applicable rewrite together with its semantic price. Adopting the
//! rewrite is entirely the caller's decision.
//!
//! Rules are grouped into three categories applied in a fixed order:
//! consistency weakening first, then structural rewrites, then
//! replacement with an explicitly commutative operation. Within a
//! category, earlier rules win. The order is part of the contract:
//! rewrites do not commute, so a different order would give different
//! advice.

use crate::analyzer::SignatureAnalyzer;
use alder_core::{
    hash, Classification, Confidence, Key, LwwTag, Mutation, OperationClass,
    OperationDescriptor, ReplicaId, SignatureTable,
};
use std::fmt;

/// Rule categories, in canonical application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleCategory {
    /// Trade a guarantee for convergence, e.g. exact bounds for escrowed ones
    ConsistencyWeakening,
    /// Reshape keys or placement without changing semantics
    Structural,
    /// Replace the operation with an explicitly commutative one
    CommutativeReplacement,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsistencyWeakening => f.write_str("consistency-weakening"),
            Self::Structural => f.write_str("structural"),
            Self::CommutativeReplacement => f.write_str("commutative-replacement"),
        }
    }
}

/// Qualitative semantic price of adopting a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CostRank {
    /// Semantics preserved, only shape changes
    Low,
    /// Weaker guarantees in corner cases
    Moderate,
    /// Visibly different semantics under concurrency
    High,
}

/// What the catalog consults while rewriting.
pub struct AdviceContext<'a> {
    /// Signature table in force
    pub signatures: &'a SignatureTable,
    /// Classification of the descriptor under advice
    pub classification: Classification,
    /// Cluster size, for sizing escrow shares
    pub replicas: usize,
}

/// A rewrite rule: a total, idempotent transform on descriptors.
///
/// `rewrite` returns the descriptor unchanged when the rule does not
/// apply, and applying a rule to its own output changes nothing.
pub trait RestructuringRule: Send + Sync {
    /// Stable rule name, e.g. `"escrow-bounded-increment"`.
    fn name(&self) -> &'static str;

    /// Category the rule belongs to.
    fn category(&self) -> RuleCategory;

    /// Semantic price of adopting the rewrite.
    fn cost(&self) -> CostRank;

    /// One-line description of the trade the rewrite makes.
    fn rationale(&self) -> &'static str;

    /// Total transform; identity when inapplicable.
    fn rewrite(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &AdviceContext<'_>,
    ) -> OperationDescriptor;
}

/// A suggested rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advice {
    /// Rule that produced the suggestion
    pub rule: &'static str,
    /// Category the rule belongs to
    pub category: RuleCategory,
    /// Semantic price of adopting it
    pub cost: CostRank,
    /// What the caller gives up
    pub rationale: &'static str,
    /// The rewritten descriptor, ready to submit
    pub rewritten: OperationDescriptor,
    /// How the rewritten operation classifies
    pub resulting: Classification,
}

/// Replace an exact bounds check with per-replica escrow shares.
///
/// Each replica gets `headroom / n` to spend locally; increments become
/// provably abelian at the price of refusals while unspent share remains
/// elsewhere.
struct EscrowBoundedIncrement;

impl RestructuringRule for EscrowBoundedIncrement {
    fn name(&self) -> &'static str {
        "escrow-bounded-increment"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::ConsistencyWeakening
    }

    fn cost(&self) -> CostRank {
        CostRank::Moderate
    }

    fn rationale(&self) -> &'static str {
        "bounds hold globally but a replica may refuse while headroom sits unspent elsewhere"
    }

    fn rewrite(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &AdviceContext<'_>,
    ) -> OperationDescriptor {
        let Mutation::BoundedIncrement { delta, floor, ceiling } = descriptor.mutation else {
            return descriptor.clone();
        };
        let headroom = ceiling.saturating_sub(floor).max(0) as u64;
        let share = (headroom / ctx.replicas.max(1) as u64).max(1);
        let mut rewritten = descriptor.clone();
        rewritten.mutation = Mutation::EscrowIncrement { delta, floor, ceiling, share };
        rewritten
    }
}

/// Split a contended register key across shards.
///
/// Applies when the signature table carries a shard hint for `write`.
/// The shard is picked from the origin replica, so one origin's writes
/// stay on one shard. Keys already sharded are left alone.
struct ShardRegisterWrite;

impl ShardRegisterWrite {
    fn shard_of(origin: ReplicaId, shards: u16) -> u16 {
        let digest = hash::hash(origin.uuid().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(prefix) % shards as u64) as u16
    }
}

impl RestructuringRule for ShardRegisterWrite {
    fn name(&self) -> &'static str {
        "shard-register-write"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Structural
    }

    fn cost(&self) -> CostRank {
        CostRank::Low
    }

    fn rationale(&self) -> &'static str {
        "writes spread over per-shard coordinators; readers must merge shards"
    }

    fn rewrite(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &AdviceContext<'_>,
    ) -> OperationDescriptor {
        if !matches!(descriptor.mutation, Mutation::Write { .. }) {
            return descriptor.clone();
        }
        let Some(shards) = ctx.signatures.lookup("write").and_then(|entry| entry.shards) else {
            return descriptor.clone();
        };
        if shards == 0 || descriptor.key.as_str().contains('#') {
            return descriptor.clone();
        }
        let shard = Self::shard_of(descriptor.origin, shards);
        let mut rewritten = descriptor.clone();
        rewritten.key = Key::from(format!("{}#{shard}", descriptor.key).as_str());
        rewritten
    }
}

/// Replace an agreed overwrite with a last-writer-wins write.
///
/// The rewritten tag carries stamp zero; submission stamps it with the
/// local clock.
struct LastWriterRegister;

impl RestructuringRule for LastWriterRegister {
    fn name(&self) -> &'static str {
        "last-writer-register"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::CommutativeReplacement
    }

    fn cost(&self) -> CostRank {
        CostRank::High
    }

    fn rationale(&self) -> &'static str {
        "concurrent writes no longer serialize; all but the greatest tag are lost"
    }

    fn rewrite(
        &self,
        descriptor: &OperationDescriptor,
        _ctx: &AdviceContext<'_>,
    ) -> OperationDescriptor {
        let Mutation::Write { ref value } = descriptor.mutation else {
            return descriptor.clone();
        };
        let mut rewritten = descriptor.clone();
        rewritten.mutation = Mutation::WriteLww {
            value: value.clone(),
            tag: LwwTag::new(0, descriptor.origin),
        };
        rewritten
    }
}

/// Replace an agreed removal with a permanent tombstone.
struct TombstoneRemoveRule;

impl RestructuringRule for TombstoneRemoveRule {
    fn name(&self) -> &'static str {
        "tombstone-remove"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::CommutativeReplacement
    }

    fn cost(&self) -> CostRank {
        CostRank::Moderate
    }

    fn rationale(&self) -> &'static str {
        "removed elements can never be re-added, and no presence outcome is reported"
    }

    fn rewrite(
        &self,
        descriptor: &OperationDescriptor,
        _ctx: &AdviceContext<'_>,
    ) -> OperationDescriptor {
        let Mutation::SetRemove { ref element } = descriptor.mutation else {
            return descriptor.clone();
        };
        let mut rewritten = descriptor.clone();
        rewritten.mutation = Mutation::TombstoneRemove { element: element.clone() };
        rewritten
    }
}

/// Promote a heuristic classification to a caller declaration.
///
/// The one consumer of heuristic results: when the name pattern suspects
/// an algebraic class, suggest declaring it so the classifier can prove
/// it. The declaration is the caller's assertion to verify.
struct AdoptHeuristicSignature;

impl RestructuringRule for AdoptHeuristicSignature {
    fn name(&self) -> &'static str {
        "adopt-heuristic-signature"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::CommutativeReplacement
    }

    fn cost(&self) -> CostRank {
        CostRank::High
    }

    fn rationale(&self) -> &'static str {
        "trusts an unverified name pattern; declare only after checking the operator's algebra"
    }

    fn rewrite(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &AdviceContext<'_>,
    ) -> OperationDescriptor {
        if descriptor.declared.is_some()
            || !matches!(descriptor.mutation, Mutation::Apply { .. })
            || ctx.classification.confidence != Confidence::Heuristic
            || ctx.classification.properties.classify() == OperationClass::Generic
        {
            return descriptor.clone();
        }
        let mut rewritten = descriptor.clone();
        rewritten.declared = Some(ctx.classification.properties);
        rewritten
    }
}

fn standard_catalog() -> Vec<Box<dyn RestructuringRule>> {
    vec![
        Box::new(EscrowBoundedIncrement),
        Box::new(ShardRegisterWrite),
        Box::new(LastWriterRegister),
        Box::new(TombstoneRemoveRule),
        Box::new(AdoptHeuristicSignature),
    ]
}

/// Walks the rule catalog for operations classified as generic.
pub struct Advisor {
    analyzer: SignatureAnalyzer,
    replicas: usize,
    catalog: Vec<Box<dyn RestructuringRule>>,
}

impl Advisor {
    /// Advisor with the standard catalog.
    pub fn new(analyzer: SignatureAnalyzer, replicas: usize) -> Self {
        Self {
            analyzer,
            replicas,
            catalog: standard_catalog(),
        }
    }

    /// Append rules to the catalog.
    ///
    /// Composition is concatenation; the canonical category order is then
    /// re-imposed with a stable sort, so appended rules keep their
    /// relative order within their category.
    pub fn with_rules(mut self, extra: Vec<Box<dyn RestructuringRule>>) -> Self {
        self.catalog.extend(extra);
        self.catalog.sort_by_key(|rule| rule.category());
        self
    }

    /// Suggest a rewrite for `descriptor`, or `None` when it is already
    /// cheap or no rule applies.
    ///
    /// Deterministic: the same descriptor and table always produce the
    /// same advice.
    pub fn advise(&self, descriptor: &OperationDescriptor) -> Option<Advice> {
        let classification = self.analyzer.classify(descriptor);
        if classification.effective_class() != OperationClass::Generic {
            return None;
        }
        let ctx = AdviceContext {
            signatures: self.analyzer.signatures().as_ref(),
            classification,
            replicas: self.replicas,
        };
        for rule in &self.catalog {
            let rewritten = rule.rewrite(descriptor, &ctx);
            if rewritten != *descriptor {
                let resulting = self.analyzer.classify(&rewritten);
                tracing::debug!(
                    operation = %descriptor.id,
                    rule = rule.name(),
                    category = %rule.category(),
                    resulting = %resulting.class,
                    "restructuring advice produced"
                );
                return Some(Advice {
                    rule: rule.name(),
                    category: rule.category(),
                    cost: rule.cost(),
                    rationale: rule.rationale(),
                    rewritten,
                    resulting,
                });
            }
        }
        None
    }
}
