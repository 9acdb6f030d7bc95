//! Video conversion worker.
//!
//! This crate provides:
//! - Task orchestration (claim, merge, transcode, record, notify, settle)
//! - A bounded worker pool fed from the conversion queue
//! - Retry policy with backoff and dead-lettering
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{PipelineError, WorkerError, WorkerResult};
pub use executor::TaskExecutor;
pub use logging::TaskLogger;
pub use orchestrator::{Disposition, TaskOrchestrator};
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryDecision, RetryPolicy, RetryResult};
