//! Report capture for assertions.

use alder_core::{OperationId, OperationReport, TelemetrySink};
use parking_lot::Mutex;

/// Sink that retains every report for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<OperationReport>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports seen so far, in emission order.
    pub fn reports(&self) -> Vec<OperationReport> {
        self.reports.lock().clone()
    }

    /// Report for one operation, if it reached a terminal state here.
    pub fn for_operation(&self, operation: OperationId) -> Option<OperationReport> {
        self.reports
            .lock()
            .iter()
            .find(|report| report.operation == operation)
            .cloned()
    }
}

impl TelemetrySink for RecordingSink {
    fn report(&self, report: OperationReport) {
        self.reports.lock().push(report);
    }
}
