//! In-memory transport mesh with fault injection.
//!
//! Every replica registers with one [`MemoryMesh`] and gets a transport
//! handle plus the inbox its runtime loop consumes. The mesh delivers
//! envelopes directly into peer inboxes and injects faults at the send
//! boundary: partitions refuse delivery, lossy links drop envelopes the
//! sender believes it sent, and duplicating links deliver twice. Fault
//! draws come from a seeded generator, so a failing run replays exactly.

use alder_core::{AlderError, AlderResult, Envelope, ReplicaId, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Envelopes buffered per inbox before senders start failing.
const INBOX_CAPACITY: usize = 1024;

struct MeshState {
    inboxes: HashMap<ReplicaId, mpsc::Sender<Envelope>>,
    /// Partition group per replica; empty means fully connected. While a
    /// partition is active, replicas absent from every group are isolated.
    groups: HashMap<ReplicaId, usize>,
    loss: f64,
    duplication: f64,
    rng: ChaCha8Rng,
    dropped: u64,
}

impl MeshState {
    fn can_reach(&self, from: ReplicaId, to: ReplicaId) -> bool {
        if self.groups.is_empty() {
            return true;
        }
        match (self.groups.get(&from), self.groups.get(&to)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Shared state of one simulated network.
#[derive(Clone)]
pub struct MemoryMesh {
    state: Arc<Mutex<MeshState>>,
}

impl MemoryMesh {
    /// Fully connected mesh with no faults, seeded for replayable draws.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MeshState {
                inboxes: HashMap::new(),
                groups: HashMap::new(),
                loss: 0.0,
                duplication: 0.0,
                rng: ChaCha8Rng::seed_from_u64(seed),
                dropped: 0,
            })),
        }
    }

    /// Attach a replica: its transport handle and the inbox to feed its
    /// dispatch loop.
    pub fn register(&self, replica: ReplicaId) -> (MemoryTransport, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(INBOX_CAPACITY);
        self.state.lock().inboxes.insert(replica, sender);
        let transport = MemoryTransport {
            local: replica,
            state: Arc::clone(&self.state),
        };
        (transport, receiver)
    }

    /// Split the mesh into disconnected groups.
    ///
    /// Replaces any partition already in force. Delivery inside a group is
    /// unaffected; delivery across groups fails at the sender.
    pub fn partition(&self, groups: &[&[ReplicaId]]) {
        let mut state = self.state.lock();
        state.groups.clear();
        for (index, group) in groups.iter().enumerate() {
            for replica in *group {
                state.groups.insert(*replica, index);
            }
        }
    }

    /// Reconnect everything.
    pub fn heal(&self) {
        self.state.lock().groups.clear();
    }

    /// Drop each envelope with this probability. Lost envelopes look sent
    /// to the sender.
    pub fn set_loss(&self, probability: f64) {
        self.state.lock().loss = probability;
    }

    /// Deliver each envelope twice with this probability.
    pub fn set_duplication(&self, probability: f64) {
        self.state.lock().duplication = probability;
    }

    /// Envelopes silently dropped so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

/// One replica's handle onto the mesh.
pub struct MemoryTransport {
    local: ReplicaId,
    state: Arc<Mutex<MeshState>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, to: ReplicaId, envelope: Envelope) -> AlderResult<()> {
        // Fault decisions happen under the lock; the actual delivery must
        // not, since a full inbox would block with the lock held.
        let (sender, copies) = {
            let mut state = self.state.lock();
            if !state.can_reach(self.local, to) {
                return Err(AlderError::transport(format!(
                    "{} cannot reach {to} across the partition",
                    self.local
                )));
            }
            if state.loss > 0.0 && state.rng.gen::<f64>() < state.loss {
                state.dropped += 1;
                return Ok(());
            }
            let copies =
                if state.duplication > 0.0 && state.rng.gen::<f64>() < state.duplication {
                    2
                } else {
                    1
                };
            let sender = state.inboxes.get(&to).cloned().ok_or_else(|| {
                AlderError::transport(format!("{to} is not registered with the mesh"))
            })?;
            (sender, copies)
        };
        for _ in 0..copies {
            sender
                .send(envelope.clone())
                .await
                .map_err(|_| AlderError::transport(format!("{to} stopped receiving")))?;
        }
        Ok(())
    }

    fn reachable(&self) -> Vec<ReplicaId> {
        let state = self.state.lock();
        let mut peers: Vec<ReplicaId> = state
            .inboxes
            .keys()
            .filter(|id| **id != self.local && state.can_reach(self.local, **id))
            .copied()
            .collect();
        peers.sort();
        peers
    }
}
