//! Replica runtime for Alder.
//!
//! Assembles the classification pipeline, both executors, and per-operation
//! commit tracking into a single [`Replica`]. Submitters get a
//! [`SubmitReceipt`] with the chosen route and a [`CommitHandle`] that
//! resolves when the operation commits or fails; the wire side is one
//! inbox of [`alder_core::Envelope`]s fed to [`Replica::start`].

pub mod completion;
pub mod config;
pub mod replica;

pub use alder_gossip::GossipConfig;
pub use alder_quorum::QuorumConfig;
pub use completion::{CommitHandle, Completion, CompletionHub};
pub use config::ReplicaConfig;
pub use replica::{Replica, ReplicaTasks, SubmitReceipt};
