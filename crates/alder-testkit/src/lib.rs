//! Test harness for Alder: an in-memory cluster with fault injection.
//!
//! The pieces compose bottom-up: [`MemoryMesh`] simulates the network
//! with partitions, loss, and duplication; [`RecordingSink`] captures
//! telemetry; [`TestCluster`] runs real replicas over both. Integration
//! tests build a cluster, submit operations at chosen nodes, break the
//! network, and assert on convergence.

pub mod cluster;
pub mod telemetry;
pub mod transport;

pub use cluster::{fast_config, ClusterBuilder, TestCluster, TestNode};
pub use telemetry::RecordingSink;
pub use transport::{MemoryMesh, MemoryTransport};

/// Install the fmt tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
