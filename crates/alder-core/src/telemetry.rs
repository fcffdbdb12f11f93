//! Per-operation telemetry.
//!
//! One [`OperationReport`] is emitted when an operation reaches a terminal
//! state, carrying what the classifier decided and what execution cost.

use crate::descriptor::{Confidence, OperationClass};
use crate::identifiers::{Key, OperationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Path an operation executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionPath {
    /// Local apply plus background dissemination, zero coordination rounds
    CoordinationFree,
    /// Leader-coordinated agreement
    Consensus,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoordinationFree => f.write_str("coordination-free"),
            Self::Consensus => f.write_str("consensus"),
        }
    }
}

/// Terminal outcome carried by a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportOutcome {
    /// Committed, effect applied
    Committed,
    /// Committed as a no-op after its guard failed
    Rejected,
    /// Failed before committing
    Failed {
        /// The failure, rendered for the report
        error: String,
    },
}

/// Report emitted once per operation at terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    /// Operation the report describes
    pub operation: OperationId,
    /// Key the operation addressed
    pub key: Key,
    /// Operator name, for per-operator dashboards
    pub operator: String,
    /// Class the classifier assigned
    pub class: OperationClass,
    /// How the classification was established
    pub confidence: Confidence,
    /// Path the operation executed on
    pub path: ExecutionPath,
    /// Consensus rounds actually used; zero on the coordination-free path
    pub rounds: u32,
    /// Submission-to-terminal latency
    pub latency: Duration,
    /// How the operation ended
    pub outcome: ReportOutcome,
}

/// Sink receiving operation reports.
///
/// Called on the commit path; implementations must not block.
pub trait TelemetrySink: Send + Sync {
    /// Accept one report.
    fn report(&self, report: OperationReport);
}

/// Sink that logs reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn report(&self, report: OperationReport) {
        tracing::info!(
            operation = %report.operation,
            key = %report.key,
            operator = %report.operator,
            class = %report.class,
            confidence = ?report.confidence,
            path = %report.path,
            rounds = report.rounds,
            latency_us = report.latency.as_micros() as u64,
            outcome = ?report.outcome,
            "operation reached terminal state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_display() {
        assert_eq!(ExecutionPath::CoordinationFree.to_string(), "coordination-free");
        assert_eq!(ExecutionPath::Consensus.to_string(), "consensus");
    }

    #[test]
    fn reports_serialize_for_export() {
        let report = OperationReport {
            operation: OperationId::from_label("op"),
            key: Key::from("votes"),
            operator: "increment".into(),
            class: OperationClass::Abelian,
            confidence: Confidence::Proven,
            path: ExecutionPath::CoordinationFree,
            rounds: 0,
            latency: Duration::from_micros(120),
            outcome: ReportOutcome::Committed,
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("increment"));
        let back: OperationReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(report, back);
    }
}
