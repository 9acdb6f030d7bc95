//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use vconv_models::ErrorStage;

/// Install the Prometheus recorder and serve `/metrics` on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_TOTAL: &str = "vconv_tasks_total";
    pub const TASK_DURATION_SECONDS: &str = "vconv_task_duration_seconds";
    pub const STAGE_FAILURES_TOTAL: &str = "vconv_stage_failures_total";
    pub const TASKS_IN_FLIGHT: &str = "vconv_tasks_in_flight";
    pub const RECLAIMED_TOTAL: &str = "vconv_reclaimed_deliveries_total";
}

/// Record a settled task by outcome.
pub fn record_task(outcome: &'static str, duration: Duration) {
    counter!(names::TASKS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "outcome" => outcome).record(duration.as_secs_f64());
}

/// Record a failure at a pipeline stage.
pub fn record_stage_failure(stage: ErrorStage) {
    counter!(names::STAGE_FAILURES_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn task_started() {
    gauge!(names::TASKS_IN_FLIGHT).increment(1.0);
}

pub fn task_finished() {
    gauge!(names::TASKS_IN_FLIGHT).decrement(1.0);
}

pub fn record_reclaimed(count: usize) {
    counter!(names::RECLAIMED_TOTAL).increment(count as u64);
}
