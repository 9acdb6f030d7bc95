//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vconv_media::{MergeOptions, UnnumberedChunks, DEFAULT_CHUNK_EXTENSION};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum tasks processed at once
    pub max_concurrent_tasks: usize,
    /// Deliveries buffered between the consumer and the workers
    pub intake_capacity: usize,
    /// How long a single consume call blocks waiting for messages
    pub consume_block: Duration,
    /// Hard deadline for one transcoder run
    pub transcode_timeout: Duration,
    /// Attempts per task before it is dead-lettered
    pub max_attempts: u32,
    /// First retry delay, doubled per attempt
    pub retry_base_delay: Duration,
    /// Upper bound on the retry delay
    pub retry_max_delay: Duration,
    /// How often the worker scans for orphaned pending deliveries
    pub claim_interval: Duration,
    /// Minimum idle time before a pending delivery can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Chunk file extension, without the dot
    pub chunk_extension: String,
    /// Handling of chunks without a sequence number
    pub unnumbered_chunks: UnnumberedChunks,
    /// FFmpeg binary name or path
    pub ffmpeg_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            intake_capacity: 8,
            consume_block: Duration::from_secs(1),
            transcode_timeout: Duration::from_secs(3600), // 1 hour
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            // Longer than a transcode may run, so live work is never reclaimed
            claim_min_idle: Duration::from_secs(3900),
            shutdown_timeout: Duration::from_secs(30),
            chunk_extension: DEFAULT_CHUNK_EXTENSION.to_string(),
            unnumbered_chunks: UnnumberedChunks::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let unnumbered_chunks = match std::env::var("WORKER_UNNUMBERED_CHUNKS") {
            Ok(value) => value.parse().map_err(WorkerError::config_error)?,
            Err(_) => defaults.unnumbered_chunks,
        };

        let config = Self {
            max_concurrent_tasks: env_parse("WORKER_MAX_TASKS")
                .unwrap_or(defaults.max_concurrent_tasks),
            intake_capacity: env_parse("WORKER_INTAKE_CAPACITY")
                .unwrap_or(defaults.intake_capacity),
            consume_block: env_parse("WORKER_CONSUME_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consume_block),
            transcode_timeout: env_parse("WORKER_TRANSCODE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.transcode_timeout),
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_base_delay: env_parse("WORKER_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_parse("WORKER_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_delay),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            chunk_extension: std::env::var("WORKER_CHUNK_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(defaults.chunk_extension),
            unnumbered_chunks,
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the executor cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_TASKS must be at least 1"));
        }
        if self.intake_capacity == 0 {
            return Err(WorkerError::config_error("WORKER_INTAKE_CAPACITY must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_ATTEMPTS must be at least 1"));
        }
        if self.chunk_extension.is_empty() {
            return Err(WorkerError::config_error("WORKER_CHUNK_EXTENSION must not be empty"));
        }
        // Deliveries idle this long are taken over, so a running transcode
        // must always finish first.
        if self.claim_min_idle <= self.transcode_timeout {
            return Err(WorkerError::config_error(format!(
                "WORKER_CLAIM_MIN_IDLE_SECS ({}s) must exceed WORKER_TRANSCODE_TIMEOUT_SECS ({}s)",
                self.claim_min_idle.as_secs(),
                self.transcode_timeout.as_secs()
            )));
        }
        Ok(())
    }

    /// Reject a ledger claim TTL that could expire while a transcode is
    /// still running.
    pub fn validate_claim_ttl(&self, claim_ttl: Duration) -> WorkerResult<()> {
        if claim_ttl <= self.transcode_timeout {
            return Err(WorkerError::config_error(format!(
                "LEDGER_CLAIM_TTL_SECS ({}s) must exceed WORKER_TRANSCODE_TIMEOUT_SECS ({}s)",
                claim_ttl.as_secs(),
                self.transcode_timeout.as_secs()
            )));
        }
        Ok(())
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            extension: self.chunk_extension.clone(),
            unnumbered: self.unnumbered_chunks,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_base_delay, self.retry_max_delay)
    }
}
