//! Coordination-free execution for operations that need no agreement.
//!
//! Operations routed here are applied locally, acknowledged immediately,
//! and disseminated to peers in the background. Convergence relies on the
//! algebraic properties of the mutations (join semilattices and abelian
//! updates), not on ordering. A periodic anti-entropy exchange repairs
//! whatever dissemination missed and verifies that replicas which have
//! seen the same operations hold the same state.

pub mod config;
pub mod executor;

pub use config::GossipConfig;
pub use executor::GossipExecutor;
