//! Shared data models for the vconv conversion pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Conversion tasks and completion confirmations (queue wire format)
//! - Ledger records (processed videos, error log entries)
//! - Pipeline stages used to tag failures

pub mod ledger;
pub mod task;
pub mod video;

pub use ledger::{
    ErrorStage, ProcessErrorDetails, ProcessErrorRecord, ProcessStatus, ProcessedVideoRecord,
};
pub use task::{ConfirmationMessage, ConversionTask, TaskError, MANIFEST_FILE, MERGED_FILE, OUTPUT_DIR};
pub use video::VideoId;
