//! Worker error types.

use thiserror::Error;

use vconv_ledger::LedgerError;
use vconv_media::MediaError;
use vconv_models::{ErrorStage, TaskError, VideoId};
use vconv_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that stop the worker process itself.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Intake channel closed")]
    IntakeClosed,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Failures of a single task attempt.
///
/// None of these escape the orchestrator: each is logged, written to the
/// error table, and turned into a settlement decision.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to deserialize task: {0}")]
    Deserialization(#[from] TaskError),

    #[error("video {0} already processed")]
    AlreadyProcessed(VideoId),

    #[error("failed to query ledger: {0}")]
    DatabaseQuery(#[source] LedgerError),

    #[error("failed to merge chunks: {0}")]
    Merge(#[source] MediaError),

    #[error("failed to convert video: {0}")]
    Transcode(#[source] MediaError),

    #[error("failed to register processed video: {0}")]
    LedgerWrite(#[source] LedgerError),

    #[error("failed to publish confirmation: {0}")]
    Publish(#[source] QueueError),
}

impl PipelineError {
    pub fn stage(&self) -> ErrorStage {
        match self {
            PipelineError::Deserialization(_) => ErrorStage::Deserialize,
            PipelineError::AlreadyProcessed(_) => ErrorStage::Check,
            PipelineError::DatabaseQuery(_) => ErrorStage::Claim,
            PipelineError::Merge(_) => ErrorStage::Merge,
            PipelineError::Transcode(_) => ErrorStage::Transcode,
            PipelineError::LedgerWrite(_) => ErrorStage::Record,
            PipelineError::Publish(_) => ErrorStage::Publish,
        }
    }

    /// Short description stored as the `error` field of the error log.
    pub fn summary(&self) -> &'static str {
        match self {
            PipelineError::Deserialization(_) => "failed to deserialize task",
            PipelineError::AlreadyProcessed(_) => "video already processed",
            PipelineError::DatabaseQuery(_) => "failed to query ledger",
            PipelineError::Merge(_) => "failed to merge chunks",
            PipelineError::Transcode(_) => "failed to convert video",
            PipelineError::LedgerWrite(_) => "failed to register processed video",
            PipelineError::Publish(_) => "failed to publish confirmation",
        }
    }

    /// Transcoder output attached to the failure, if any.
    pub fn captured_output(&self) -> Option<String> {
        match self {
            PipelineError::Transcode(e) | PipelineError::Merge(e) => {
                e.captured_output().map(str::to_string)
            }
            _ => None,
        }
    }

    /// Whether another delivery of the same task may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Merge(e) | PipelineError::Transcode(e) => e.is_retryable(),
            PipelineError::DatabaseQuery(_) | PipelineError::Publish(_) => true,
            PipelineError::Deserialization(_)
            | PipelineError::AlreadyProcessed(_)
            | PipelineError::LedgerWrite(_) => false,
        }
    }
}
