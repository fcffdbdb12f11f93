//! Multi-replica cluster fixture.
//!
//! Builds a full cluster over a [`MemoryMesh`]: every node runs a real
//! [`Replica`] with its dispatch and anti-entropy loops started, reporting
//! into its own [`RecordingSink`]. Tests submit at any node, inject faults
//! through the mesh, and assert on convergence with the polling helpers.

use crate::telemetry::RecordingSink;
use crate::transport::MemoryMesh;
use alder_core::{
    AlderError, AlderResult, Key, Membership, ReplicaId, SignatureTable, Slot, TelemetrySink,
    Transport,
};
use alder_runtime::{GossipConfig, QuorumConfig, Replica, ReplicaConfig, ReplicaTasks};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Poll step for the convergence helpers.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Replica tunables tightened for test runs.
///
/// Sync and round timers shrink from hundreds of milliseconds to a few,
/// so partition-and-heal tests finish quickly without a virtual clock.
pub fn fast_config() -> ReplicaConfig {
    ReplicaConfig {
        gossip: GossipConfig {
            sync_interval: Duration::from_millis(25),
            ..GossipConfig::default()
        },
        quorum: QuorumConfig {
            round_timeout: Duration::from_millis(50),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(40),
            ..QuorumConfig::default()
        },
        archive_capacity: 64,
    }
}

/// Configures a [`TestCluster`] before it starts.
pub struct ClusterBuilder {
    size: usize,
    config: ReplicaConfig,
    signatures: SignatureTable,
    seed: u64,
}

impl ClusterBuilder {
    /// Builder for a cluster of `size` replicas with [`fast_config`] and an
    /// empty signature table.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            config: fast_config(),
            signatures: SignatureTable::new(),
            seed: 0,
        }
    }

    /// Replace the per-node configuration.
    pub fn config(mut self, config: ReplicaConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a signature table, shared by every node.
    pub fn signatures(mut self, signatures: SignatureTable) -> Self {
        self.signatures = signatures;
        self
    }

    /// Seed for the mesh's fault draws.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Start every node and its background loops.
    pub async fn start(self) -> AlderResult<TestCluster> {
        let members: Vec<ReplicaId> = (0..self.size)
            .map(|index| ReplicaId::from_label(&format!("replica-{index}")))
            .collect();
        let membership = Membership::new(members.iter().copied())?;
        let signatures = Arc::new(self.signatures);
        let mesh = MemoryMesh::new(self.seed);

        let mut nodes = Vec::with_capacity(self.size);
        for id in &members {
            let (transport, inbox) = mesh.register(*id);
            let telemetry = Arc::new(RecordingSink::new());
            let replica = Arc::new(Replica::new(
                self.config.clone(),
                *id,
                membership.clone(),
                Arc::clone(&signatures),
                Arc::new(transport) as Arc<dyn Transport>,
                Arc::clone(&telemetry) as Arc<dyn TelemetrySink>,
            ));
            let tasks = replica.start(inbox);
            nodes.push(TestNode { replica, telemetry, tasks });
        }
        Ok(TestCluster { mesh, nodes, members })
    }
}

/// One running replica plus its capture sink.
pub struct TestNode {
    /// The replica under test
    pub replica: Arc<Replica>,
    /// Reports emitted by this node's submissions
    pub telemetry: Arc<RecordingSink>,
    tasks: ReplicaTasks,
}

/// A running cluster over an in-memory mesh.
pub struct TestCluster {
    mesh: MemoryMesh,
    nodes: Vec<TestNode>,
    members: Vec<ReplicaId>,
}

impl TestCluster {
    /// Cluster of `size` replicas with the fast test configuration.
    pub async fn start(size: usize) -> AlderResult<Self> {
        ClusterBuilder::new(size).start().await
    }

    /// The mesh, for fault injection.
    pub fn mesh(&self) -> &MemoryMesh {
        &self.mesh
    }

    /// Node by index, in construction order.
    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// All nodes, in construction order.
    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    /// Replica id of the node at `index`.
    pub fn member(&self, index: usize) -> ReplicaId {
        self.members[index]
    }

    /// All replica ids, in construction order.
    pub fn members(&self) -> &[ReplicaId] {
        &self.members
    }

    /// Index of the node coordinating `key`.
    pub fn coordinator_index(&self, key: &Key) -> usize {
        let coordinator = self.nodes[0].replica.membership().coordinator_for(key);
        self.members
            .iter()
            .position(|id| *id == coordinator)
            .unwrap_or_else(|| panic!("coordinator {coordinator} is not in this cluster"))
    }

    /// A key whose coordinator is the node at `index`.
    pub fn key_coordinated_by(&self, index: usize) -> Key {
        let target = self.members[index];
        let membership = self.nodes[0].replica.membership();
        for n in 0..4096 {
            let key = Key::from(format!("k{n}"));
            if membership.coordinator_for(&key) == target {
                return key;
            }
        }
        panic!("no key coordinated by {target} in 4096 candidates")
    }

    /// Wait until every replica holds the same non-empty slot for `key`,
    /// and return it.
    pub async fn await_convergence(&self, key: &Key, limit: Duration) -> AlderResult<Slot> {
        let deadline = Instant::now() + limit;
        loop {
            let slots: Vec<Option<Slot>> =
                self.nodes.iter().map(|node| node.replica.store().slot(key)).collect();
            if let Some(Some(first)) = slots.first() {
                if slots.iter().all(|slot| slot.as_ref() == Some(first)) {
                    return Ok(first.clone());
                }
            }
            if Instant::now() >= deadline {
                return Err(AlderError::internal(format!(
                    "replicas did not converge on '{key}' within {limit:?}: {slots:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until every replica's committed position for `key` reaches
    /// `seq`.
    pub async fn await_committed_seq(
        &self,
        key: &Key,
        seq: u64,
        limit: Duration,
    ) -> AlderResult<()> {
        let deadline = Instant::now() + limit;
        loop {
            let positions: Vec<u64> = self
                .nodes
                .iter()
                .map(|node| node.replica.store().committed_seq(key))
                .collect();
            if positions.iter().all(|position| *position >= seq) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AlderError::internal(format!(
                    "'{key}' did not reach position {seq} everywhere within {limit:?}: {positions:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Stop every node's background loops.
    pub async fn shutdown(self) {
        for node in self.nodes {
            node.tasks.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alder_core::Mutation;

    #[tokio::test]
    async fn a_submission_at_one_node_reaches_all_of_them() {
        let cluster = TestCluster::start(3).await.expect("cluster");

        let mut receipt = cluster
            .node(0)
            .replica
            .submit(alder_core::OperationDescriptor::new(
                cluster.member(0),
                Key::from("votes"),
                Mutation::Increment { delta: 2 },
            ))
            .await
            .expect("submit");
        receipt.handle.wait().await.expect("completion");

        let slot = cluster
            .await_convergence(&Key::from("votes"), Duration::from_secs(2))
            .await
            .expect("convergence");
        match slot {
            Slot::Counter(counter) => assert_eq!(counter.value(), 2),
            other => panic!("expected counter, got {other:?}"),
        }
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn coordinator_helpers_agree_with_membership() {
        let cluster = TestCluster::start(3).await.expect("cluster");
        for index in 0..3 {
            let key = cluster.key_coordinated_by(index);
            assert_eq!(cluster.coordinator_index(&key), index);
        }
        cluster.shutdown().await;
    }
}
