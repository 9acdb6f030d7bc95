//! Structured task logging utilities.
//!
//! Provides consistent, structured logging for task processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vconv_models::VideoId;

/// Task logger for structured logging with consistent formatting.
///
/// Every line carries the delivery id, the attempt number and, once the body
/// has been decoded, the video id.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    delivery_id: String,
    video_id: Option<VideoId>,
    attempt: u32,
}

impl TaskLogger {
    pub fn new(delivery_id: &str, attempt: u32) -> Self {
        Self {
            delivery_id: delivery_id.to_string(),
            video_id: None,
            attempt,
        }
    }

    /// Attach the decoded video id.
    pub fn with_video(mut self, video_id: VideoId) -> Self {
        self.video_id = Some(video_id);
        self
    }

    fn video(&self) -> i64 {
        self.video_id.map_or(-1, |id| id.as_i64())
    }

    pub fn log_start(&self, message: &str) {
        info!(
            delivery_id = %self.delivery_id,
            video_id = self.video(),
            attempt = self.attempt,
            "Task started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            delivery_id = %self.delivery_id,
            video_id = self.video(),
            attempt = self.attempt,
            "Task progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            delivery_id = %self.delivery_id,
            video_id = self.video(),
            attempt = self.attempt,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            delivery_id = %self.delivery_id,
            video_id = self.video(),
            attempt = self.attempt,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            delivery_id = %self.delivery_id,
            video_id = self.video(),
            attempt = self.attempt,
            "Task completed: {}", message
        );
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn video_id(&self) -> Option<VideoId> {
        self.video_id
    }

    /// Create a tracing span for this task.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            delivery_id = %self.delivery_id,
            video_id = self.video(),
            attempt = self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_logger_creation() {
        let logger = TaskLogger::new("1700000000000-0", 2);
        assert_eq!(logger.delivery_id(), "1700000000000-0");
        assert_eq!(logger.video_id(), None);

        let logger = logger.with_video(VideoId(42));
        assert_eq!(logger.video_id(), Some(VideoId(42)));
    }
}
