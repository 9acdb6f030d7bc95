//! Conversion task and completion confirmation.
//!
//! Both messages share the same JSON shape on the wire:
//! `{"video_id": 1, "path": "/media/uploads/1"}`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::video::VideoId;

/// Name of the transient merged file inside the task directory.
pub const MERGED_FILE: &str = "merged.mp4";

/// Name of the segmented output directory inside the task directory.
pub const OUTPUT_DIR: &str = "mpeg-dash";

/// Name of the DASH manifest inside the output directory.
pub const MANIFEST_FILE: &str = "output.mpd";

/// Errors raised while decoding a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Malformed task body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid task: {0}")]
    Invalid(String),
}

/// One unit of conversion work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    /// Video being converted
    pub video_id: VideoId,
    /// Directory holding the uploaded chunks
    pub path: PathBuf,
}

impl ConversionTask {
    pub fn new(video_id: impl Into<VideoId>, path: impl Into<PathBuf>) -> Self {
        Self {
            video_id: video_id.into(),
            path: path.into(),
        }
    }

    /// Decode and validate a queue message body.
    pub fn from_body(body: &[u8]) -> Result<Self, TaskError> {
        let task: ConversionTask = serde_json::from_slice(body)?;
        if task.path.as_os_str().is_empty() {
            return Err(TaskError::Invalid("path must not be empty".to_string()));
        }
        Ok(task)
    }

    /// Best-effort extraction of `video_id` from a body that failed to decode.
    pub fn partial_video_id(body: &[u8]) -> Option<VideoId> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value.get("video_id")?.as_i64().map(VideoId)
    }

    /// Chunk directory.
    pub fn source_dir(&self) -> &Path {
        &self.path
    }

    /// Transient merged file path.
    pub fn merged_file(&self) -> PathBuf {
        self.path.join(MERGED_FILE)
    }

    /// Segmented output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    /// DASH manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir().join(MANIFEST_FILE)
    }
}

/// Completion notification published after a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationMessage {
    pub video_id: VideoId,
    pub path: PathBuf,
}

impl ConfirmationMessage {
    /// Serialize to the JSON wire format.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<&ConversionTask> for ConfirmationMessage {
    fn from(task: &ConversionTask) -> Self {
        Self {
            video_id: task.video_id,
            path: task.path.clone(),
        }
    }
}
