//! Core types for the Alder replication runtime.
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//! identifiers, values, the operation algebra (mutations, property sets,
//! classifications), the signature table for custom operators, replica
//! state with its per-key dedup log, commit records, cluster membership,
//! and the versioned wire format.
//!
//! Higher layers build on these types: `alder-algebra` classifies, splits,
//! and routes operations; `alder-gossip` and `alder-quorum` execute them;
//! `alder-runtime` ties a replica together.

pub mod descriptor;
pub mod errors;
pub mod hash;
pub mod identifiers;
pub mod lattice;
pub mod membership;
pub mod record;
pub mod signature;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod value;
pub mod wire;

pub use descriptor::{
    Classification, Confidence, DecomposedOperation, LwwTag, Mutation, OperationClass,
    OperationDescriptor, PropertySet, SlotKind,
};
pub use errors::{AlderError, AlderResult};
pub use hash::Digest32;
pub use identifiers::{Key, OperationId, ReplicaId};
pub use membership::Membership;
pub use record::{
    CommitRecord, CommittedDecision, ConsensusPhase, DecisionLog, FreePhase, OpOutcome,
    RecordObserver, RecordState,
};
pub use signature::{FiniteOpTable, SignatureEntry, SignatureTable, SignatureTableBuilder};
pub use state::{ApplyStatus, ReplicaStore, Slot};
pub use telemetry::{ExecutionPath, OperationReport, ReportOutcome, TelemetrySink, TracingSink};
pub use transport::Transport;
pub use value::Value;
pub use wire::{Envelope, OpDigest, ReplicatedOp, WireMessage, SCHEMA_VERSION};
