//! Ledger contract.

use async_trait::async_trait;
use chrono::Utc;
use vconv_models::{ErrorStage, ProcessErrorDetails, VideoId};

use crate::error::LedgerResult;

/// Result of trying to reserve a video for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the video until it releases the claim or the claim expires.
    Claimed,
    /// A success record already exists.
    AlreadyProcessed,
    /// Another worker holds a live claim.
    Busy,
}

/// Context attached to an error log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub video_id: Option<VideoId>,
    pub stage: ErrorStage,
    pub message: String,
    pub output: Option<String>,
    pub attempt: u32,
}

impl ErrorContext {
    pub fn new(stage: ErrorStage, message: impl Into<String>) -> Self {
        Self {
            video_id: None,
            stage,
            message: message.into(),
            output: None,
            attempt: 0,
        }
    }

    pub fn with_video(mut self, video_id: Option<VideoId>) -> Self {
        self.video_id = video_id;
        self
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Combine with the underlying cause into the stored payload.
    pub fn into_details(self, cause: &(dyn std::error::Error + Send + Sync)) -> ProcessErrorDetails {
        ProcessErrorDetails {
            video_id: self.video_id,
            stage: self.stage,
            error: self.message,
            details: cause.to_string(),
            output: self.output,
            attempt: self.attempt,
            time: Utc::now(),
        }
    }
}

/// Durable record of completed videos and failed attempts.
///
/// Implementations are the sole writers of the ledger tables.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Whether a success record exists for `video_id`.
    ///
    /// Returns `false` when the lookup itself fails so that a database fault
    /// never blocks reprocessing.
    async fn is_processed(&self, video_id: VideoId) -> bool;

    /// Atomically reserve `video_id` for `owner`.
    async fn claim(&self, video_id: VideoId, owner: &str) -> LedgerResult<ClaimOutcome>;

    /// Drop a claim held by `owner`.
    async fn release(&self, video_id: VideoId, owner: &str) -> LedgerResult<()>;

    /// Insert the success record for `video_id`.
    ///
    /// Must be called exactly once per successful conversion; a second call
    /// fails with [`LedgerError::AlreadyMarked`](crate::LedgerError::AlreadyMarked).
    async fn mark_processed(&self, video_id: VideoId) -> LedgerResult<()>;

    /// Append to the error log. Never fails; write errors are logged locally.
    async fn record_error(
        &self,
        context: ErrorContext,
        cause: &(dyn std::error::Error + Send + Sync),
    );
}
