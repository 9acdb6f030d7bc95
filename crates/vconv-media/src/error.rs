//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while merging chunks or packaging output.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        output: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Transcode timed out after {secs} seconds")]
    TranscodeTimeout { secs: u64, output: String },

    #[error("Failed to read chunk directory {path}: {source}")]
    ChunkDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read chunk {path}: {source}")]
    ChunkRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write merged file {path}: {source}")]
    MergeWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No chunks found in {0}")]
    NoChunks(PathBuf),

    #[error("Chunk name has no sequence number: {0}")]
    UnnumberedChunk(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        output: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            output,
            exit_code,
        }
    }

    /// Output captured from the transcoder, when the failure carries any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { output, .. } => output.as_deref(),
            MediaError::TranscodeTimeout { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }

    /// Check if error is worth retrying on a later delivery.
    ///
    /// Missing chunks and badly named chunks will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MediaError::NoChunks(_) | MediaError::UnnumberedChunk(_)
        )
    }
}
