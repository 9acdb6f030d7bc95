//! Media operations for the conversion pipeline.
//!
//! This crate provides:
//! - Chunk discovery and ordering by embedded sequence number
//! - Streaming chunk concatenation into a single file
//! - Type-safe FFmpeg command building
//! - DASH packaging via an FFmpeg subprocess with a hard deadline

pub mod chunks;
pub mod command;
pub mod error;
pub mod merge;
pub mod transcode;

pub use chunks::{discover_chunks, extract_sequence, ChunkFile, UnnumberedChunks, DEFAULT_CHUNK_EXTENSION};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner, RunOutput};
pub use error::{MediaError, MediaResult};
pub use merge::{merge_chunks, MergeOptions, MergeSummary};
pub use transcode::{FfmpegTranscoder, TranscodeOutput, Transcoder};
