//! Transport seam between replicas.

use crate::errors::AlderResult;
use crate::identifiers::ReplicaId;
use crate::wire::Envelope;
use async_trait::async_trait;

/// Outbound message delivery.
///
/// Implementations decide framing and reliability. Callers treat delivery
/// as best-effort: lost messages are repaired by anti-entropy on the
/// coordination-free path and by retries on the consensus path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one envelope to a peer.
    async fn send(&self, to: ReplicaId, envelope: Envelope) -> AlderResult<()>;

    /// Peers currently believed reachable, excluding the local replica.
    fn reachable(&self) -> Vec<ReplicaId>;

    /// Send one envelope to every reachable peer, best-effort.
    async fn broadcast(&self, envelope: Envelope) -> AlderResult<()> {
        for peer in self.reachable() {
            if let Err(error) = self.send(peer, envelope.clone()).await {
                tracing::debug!(%peer, %error, "broadcast send failed");
            }
        }
        Ok(())
    }
}
