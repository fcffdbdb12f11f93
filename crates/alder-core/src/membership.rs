//! Cluster membership.
//!
//! Membership is fixed for the life of a cluster. Coordinator assignment
//! is a pure function of membership and key, so every replica names the
//! same coordinator without talking to anyone.

use crate::errors::{AlderError, AlderResult};
use crate::hash;
use crate::identifiers::{Key, ReplicaId};
use serde::{Deserialize, Serialize};

/// The fixed set of replicas in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Sorted, deduplicated members.
    members: Vec<ReplicaId>,
}

impl Membership {
    /// Build a membership from at least one replica.
    pub fn new(members: impl IntoIterator<Item = ReplicaId>) -> AlderResult<Self> {
        let mut members: Vec<ReplicaId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        if members.is_empty() {
            return Err(AlderError::invalid("membership cannot be empty"));
        }
        Ok(Self { members })
    }

    /// Number of replicas.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the membership has no replicas. Always false for a
    /// constructed membership; present for completeness.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `replica` is a member.
    pub fn contains(&self, replica: &ReplicaId) -> bool {
        self.members.binary_search(replica).is_ok()
    }

    /// All members, in stable order.
    pub fn members(&self) -> impl Iterator<Item = &ReplicaId> + '_ {
        self.members.iter()
    }

    /// Members other than `local`.
    pub fn peers(&self, local: &ReplicaId) -> Vec<ReplicaId> {
        self.members.iter().filter(|m| *m != local).copied().collect()
    }

    /// Votes required to commit: a majority, `n / 2 + 1`.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Coordinator for `key`: stable for a fixed membership, uniform
    /// across keys.
    pub fn coordinator_for(&self, key: &Key) -> ReplicaId {
        let digest = hash::hash(key.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(prefix) % self.members.len() as u64) as usize;
        self.members[index]
    }
}
