//! Ledger metrics collection.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Total ledger operations by operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "vconv_ledger_operations_total";
}

/// Record the outcome of a ledger operation.
pub fn record_operation(operation: &'static str, outcome: &'static str) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
