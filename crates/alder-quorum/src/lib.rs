//! Consensus execution for operations that need agreement.
//!
//! Every key has one stable coordinator, chosen deterministically from the
//! membership. The coordinator serializes the key's operations, resolves
//! each one against its own state into a concrete decision, and runs the
//! decision through a quorum round: `Propose`, a majority of `Accept`,
//! then a `Commit` broadcast. Replicas apply committed decisions in
//! sequence order, so every replica sees the same history for the key.
//!
//! The round logic itself is pure (`state` + `transitions`); the executor
//! wraps it in timers, retries, and the wire protocol.

pub mod config;
pub mod executor;
pub mod resolve;
pub mod state;
pub mod transitions;

pub use config::QuorumConfig;
pub use executor::QuorumExecutor;
pub use resolve::resolve;
pub use state::{Promise, PromiseLog, RoundState};
pub use transitions::{PromiseOutcome, VoteOutcome};
