//! Operation algebra for Alder: classification, decomposition, routing,
//! and restructuring advice.
//!
//! Everything in this crate is pure. The same inputs produce the same
//! classification, the same split, and the same route at every replica,
//! which is what lets replicas act without comparing notes.
//!
//! The pipeline runs in two phases per operation:
//!
//! 1. [`SignatureAnalyzer::classify`] establishes algebraic properties and
//!    how much to trust them.
//! 2. [`Decomposer::decompose`] splits the operation into a part that
//!    commutes with concurrent siblings and a remainder that needs an
//!    agreed position.
//!
//! [`Router::route`] then picks the execution path from the split alone,
//! and [`Advisor::advise`] suggests rewrites for operations stuck on the
//! expensive path.

pub mod advisor;
pub mod analyzer;
pub mod decompose;
pub mod route;

pub use advisor::{Advice, AdviceContext, Advisor, CostRank, RestructuringRule, RuleCategory};
pub use analyzer::SignatureAnalyzer;
pub use decompose::{recompose, Decomposer};
pub use route::{Route, Router};
