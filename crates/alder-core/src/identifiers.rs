//! Identifier types used across the Alder runtime.

use crate::hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn derived_uuid(label: &[u8]) -> Uuid {
    let digest = hash::hash(label);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Unique identifier for a submitted operation.
///
/// Assigned once at submission and carried through classification,
/// dissemination, and the dedup log. Re-delivering a message with an
/// already-applied `OperationId` is a no-op at every replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Create a new random operation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive a stable ID from a label. Intended for tests and replay fixtures.
    pub fn from_label(label: &str) -> Self {
        Self(derived_uuid(label.as_bytes()))
    }

    /// Get the inner UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

impl From<Uuid> for OperationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for one replica in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub Uuid);

impl ReplicaId {
    /// Create a new random replica ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive a stable ID from a label, e.g. `"replica-a"` in tests.
    pub fn from_label(label: &str) -> Self {
        Self(derived_uuid(label.as_bytes()))
    }

    /// Get the inner UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ReplicaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

impl From<Uuid> for ReplicaId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Key addressing a single replicated cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a key from anything string-like.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key contents as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_ids_are_stable() {
        assert_eq!(ReplicaId::from_label("a"), ReplicaId::from_label("a"));
        assert_ne!(ReplicaId::from_label("a"), ReplicaId::from_label("b"));
        assert_eq!(OperationId::from_label("x"), OperationId::from_label("x"));
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(OperationId::new(), OperationId::new());
        assert_ne!(ReplicaId::new(), ReplicaId::new());
    }

    #[test]
    fn display_prefixes() {
        assert!(OperationId::new().to_string().starts_with("op-"));
        assert!(ReplicaId::new().to_string().starts_with("replica-"));
        assert_eq!(Key::from("cart:42").to_string(), "cart:42");
    }
}
