//! Durable ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::video::VideoId;

/// Status stored in `processed_videos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    Success,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Success => "success",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedVideoRecord {
    pub video_id: VideoId,
    pub status: ProcessStatus,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedVideoRecord {
    pub fn success(video_id: VideoId) -> Self {
        Self {
            video_id,
            status: ProcessStatus::Success,
            processed_at: Utc::now(),
        }
    }
}

/// Pipeline stage at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Deserialize,
    Check,
    Claim,
    Merge,
    Transcode,
    Record,
    Publish,
    Settle,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Deserialize => "deserialize",
            ErrorStage::Check => "check",
            ErrorStage::Claim => "claim",
            ErrorStage::Merge => "merge",
            ErrorStage::Transcode => "transcode",
            ErrorStage::Record => "record",
            ErrorStage::Publish => "publish",
            ErrorStage::Settle => "settle",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured payload stored in `process_errors_log.error_details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessErrorDetails {
    /// Video the failure belongs to, when known
    pub video_id: Option<VideoId>,
    /// Stage that failed
    pub stage: ErrorStage,
    /// Short description of what was being attempted
    pub error: String,
    /// Underlying cause
    pub details: String,
    /// Captured transcoder output, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Delivery attempt (0-based)
    #[serde(default)]
    pub attempt: u32,
    pub time: DateTime<Utc>,
}

/// One row of `process_errors_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessErrorRecord {
    pub error_details: ProcessErrorDetails,
    pub created_at: DateTime<Utc>,
}

impl ProcessErrorRecord {
    pub fn new(error_details: ProcessErrorDetails) -> Self {
        Self {
            error_details,
            created_at: Utc::now(),
        }
    }
}
