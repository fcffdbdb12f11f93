//! Operator signature table.
//!
//! Custom operators arrive with no intrinsic algebra, so callers declare it
//! here: either as asserted [`PropertySet`]s, or extensionally as a
//! [`FiniteOpTable`] whose properties are checked exhaustively. Entries can
//! also carry structural hints consumed by the restructuring advisor.

use crate::descriptor::PropertySet;
use crate::errors::{AlderError, AlderResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A binary operator given extensionally over the domain `{0, .., n-1}`.
///
/// `entries[a][b]` is `op(a, b)`. Domains are capped at
/// [`FiniteOpTable::MAX_DOMAIN`] so every property check stays an
/// exhaustive enumeration rather than a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiniteOpTable {
    entries: Vec<Vec<u8>>,
}

impl FiniteOpTable {
    /// Largest domain accepted.
    pub const MAX_DOMAIN: usize = 16;

    /// Build a table from an `n x n` matrix closed over `{0, .., n-1}`.
    pub fn new(entries: Vec<Vec<u8>>) -> AlderResult<Self> {
        let n = entries.len();
        if n == 0 || n > Self::MAX_DOMAIN {
            return Err(AlderError::invalid(format!(
                "operator table domain must be 1..={}, got {n}",
                Self::MAX_DOMAIN
            )));
        }
        for (a, row) in entries.iter().enumerate() {
            if row.len() != n {
                return Err(AlderError::invalid(format!(
                    "operator table row {a} has {} entries, expected {n}",
                    row.len()
                )));
            }
            if let Some(out) = row.iter().find(|out| **out as usize >= n) {
                return Err(AlderError::invalid(format!(
                    "operator table entry {out} outside domain 0..{n}"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Size of the operator's domain.
    pub fn domain(&self) -> usize {
        self.entries.len()
    }

    /// `op(a, b)`, or `None` if either operand is outside the domain.
    pub fn apply(&self, a: u8, b: u8) -> Option<u8> {
        self.entries
            .get(a as usize)
            .and_then(|row| row.get(b as usize))
            .copied()
    }

    /// `op(a, b) == op(b, a)` for every pair.
    pub fn is_commutative(&self) -> bool {
        let n = self.entries.len();
        (0..n).all(|a| (0..n).all(|b| self.entries[a][b] == self.entries[b][a]))
    }

    /// `op(op(a, b), c) == op(a, op(b, c))` for every triple.
    pub fn is_associative(&self) -> bool {
        let n = self.entries.len();
        (0..n).all(|a| {
            (0..n).all(|b| {
                (0..n).all(|c| {
                    let left = self.entries[self.entries[a][b] as usize][c];
                    let right = self.entries[a][self.entries[b][c] as usize];
                    left == right
                })
            })
        })
    }

    /// `op(a, a) == a` for every element.
    pub fn is_idempotent(&self) -> bool {
        (0..self.entries.len()).all(|a| self.entries[a][a] as usize == a)
    }

    /// Two-sided identity element, if one exists.
    pub fn identity(&self) -> Option<u8> {
        let n = self.entries.len();
        (0..n)
            .find(|&e| {
                (0..n).all(|a| {
                    self.entries[e][a] as usize == a && self.entries[a][e] as usize == a
                })
            })
            .map(|e| e as u8)
    }

    /// Every element has a two-sided inverse with respect to an identity.
    pub fn has_inverses(&self) -> bool {
        let Some(e) = self.identity() else {
            return false;
        };
        let n = self.entries.len();
        (0..n).all(|a| {
            (0..n).any(|b| self.entries[a][b] == e && self.entries[b][a] == e)
        })
    }

    /// All four properties, checked exhaustively.
    pub fn properties(&self) -> PropertySet {
        PropertySet {
            commutative: self.is_commutative(),
            associative: self.is_associative(),
            idempotent: self.is_idempotent(),
            invertible: self.has_inverses(),
        }
    }
}

/// Declared algebra and hints for one operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Properties asserted by the caller, taken as proven
    pub declared: Option<PropertySet>,
    /// Extensional definition whose properties are checked mechanically
    pub table: Option<FiniteOpTable>,
    /// Shard count suggested for splitting contended keys
    pub shards: Option<u16>,
}

/// Mapping from operator name to its declared algebra.
///
/// Declarations are trusted as proven; finite tables are checked rather
/// than trusted. An operator absent from the table classifies as unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureTable {
    entries: BTreeMap<String, SignatureEntry>,
}

impl SignatureTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a table.
    pub fn builder() -> SignatureTableBuilder {
        SignatureTableBuilder::default()
    }

    /// Entry for `operator`, if declared.
    pub fn lookup(&self, operator: &str) -> Option<&SignatureEntry> {
        self.entries.get(operator)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, operator: impl Into<String>, entry: SignatureEntry) {
        self.entries.insert(operator.into(), entry);
    }

    /// Number of declared operators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no operators are declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder collecting declarations per operator.
#[derive(Debug, Default)]
pub struct SignatureTableBuilder {
    entries: BTreeMap<String, SignatureEntry>,
}

impl SignatureTableBuilder {
    /// Assert properties for `operator`.
    pub fn declare(mut self, operator: impl Into<String>, properties: PropertySet) -> Self {
        self.entries.entry(operator.into()).or_default().declared = Some(properties);
        self
    }

    /// Define `operator` extensionally.
    pub fn define_table(mut self, operator: impl Into<String>, table: FiniteOpTable) -> Self {
        self.entries.entry(operator.into()).or_default().table = Some(table);
        self
    }

    /// Suggest a shard count for keys written through `operator`.
    pub fn shard_hint(mut self, operator: impl Into<String>, shards: u16) -> Self {
        self.entries.entry(operator.into()).or_default().shards = Some(shards);
        self
    }

    /// Finish the table.
    pub fn build(self) -> SignatureTable {
        SignatureTable {
            entries: self.entries,
        }
    }
}
