//! Shared fixtures for worker tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vconv_ledger::MemoryLedger;
use vconv_media::{MediaError, MediaResult, TranscodeOutput, Transcoder};
use vconv_models::MANIFEST_FILE;
use vconv_queue::{Delivery, MemoryGateway, QueueBinding, QueueConfig, QueueGateway};
use vconv_worker::{RetryConfig, RetryPolicy, TaskOrchestrator};

/// Transcoder double that records the merged bytes it was handed.
#[derive(Default)]
pub struct FakeTranscoder {
    inputs: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    failure_output: Option<String>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every run the way ffmpeg exiting non-zero does.
    pub fn failing(mut self, output: &str) -> Self {
        self.failure_output = Some(output.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, merged: &Path, output_dir: &Path) -> MediaResult<TranscodeOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let content = tokio::fs::read(merged).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(content?);

        if let Some(output) = &self.failure_output {
            return Err(MediaError::ffmpeg_failed(
                "ffmpeg exited with exit status: 1",
                Some(output.clone()),
                Some(1),
            ));
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let manifest = output_dir.join(MANIFEST_FILE);
        tokio::fs::write(&manifest, "<MPD/>").await?;
        tokio::fs::remove_file(merged).await?;
        Ok(TranscodeOutput {
            manifest,
            merged_removed: true,
        })
    }
}

/// Wiring of an orchestrator over in-memory collaborators.
pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub gateway: Arc<MemoryGateway>,
    pub transcoder: Arc<FakeTranscoder>,
    pub conversion: QueueBinding,
    pub confirmation: QueueBinding,
    pub orchestrator: Arc<TaskOrchestrator>,
}

impl Harness {
    pub fn new(transcoder: FakeTranscoder) -> Self {
        Self::with_policy(transcoder, RetryPolicy::new(3, Duration::ZERO, Duration::ZERO))
    }

    pub fn with_policy(transcoder: FakeTranscoder, policy: RetryPolicy) -> Self {
        let config = QueueConfig::default();
        let ledger = Arc::new(MemoryLedger::default());
        let gateway = Arc::new(MemoryGateway::new());
        let transcoder = Arc::new(transcoder);

        let orchestrator = TaskOrchestrator::new(
            ledger.clone(),
            gateway.clone(),
            transcoder.clone(),
            config.confirmation.clone(),
            "test-worker",
        )
        .with_policy(policy)
        .with_publish_retry(
            RetryConfig::new("publish_confirmation")
                .with_max_retries(1)
                .with_base_delay(Duration::from_millis(1)),
        );

        Self {
            ledger,
            gateway,
            transcoder,
            conversion: config.conversion,
            confirmation: config.confirmation,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Push a task body and receive it back as a delivery.
    pub async fn deliver(&self, body: &str) -> Delivery {
        self.gateway.push(&self.conversion, body.as_bytes().to_vec());
        self.next_delivery().await
    }

    pub async fn next_delivery(&self) -> Delivery {
        self.gateway
            .consume(&self.conversion, "test-worker", 1, Duration::ZERO)
            .await
            .unwrap()
            .pop()
            .expect("no delivery available")
    }
}

/// Upload directory with the given chunk files.
pub fn upload_dir(chunks: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in chunks {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

pub fn task_body(video_id: i64, path: &Path) -> String {
    serde_json::json!({ "video_id": video_id, "path": path }).to_string()
}

pub fn merged_path(dir: &Path) -> PathBuf {
    dir.join(vconv_models::MERGED_FILE)
}
