//! Task orchestration.
//!
//! One delivery goes through: decode, ledger check, claim, merge, transcode,
//! success record, confirmation, settlement. [`TaskOrchestrator::handle`]
//! runs the pipeline and returns a [`Disposition`];
//! [`TaskOrchestrator::settle`] applies it to the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn, Instrument};

use vconv_ledger::{ClaimOutcome, ErrorContext, IdempotencyLedger, LedgerError};
use vconv_media::{merge_chunks, MergeOptions, Transcoder};
use vconv_models::{ConfirmationMessage, ConversionTask, ErrorStage, VideoId};
use vconv_queue::{Delivery, QueueBinding, QueueError, QueueGateway};

use crate::error::PipelineError;
use crate::logging::TaskLogger;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig, RetryDecision, RetryPolicy, RetryResult};

/// How a delivery is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done, or nothing to do.
    Ack,
    /// Failed; requeue with the attempt counter incremented after `delay`.
    Retry { delay: Duration },
    /// Another worker holds the video; requeue with the same attempt and one
    /// more deferral after `delay`.
    Defer { delay: Duration },
    /// Poison or out of attempts.
    DeadLetter { reason: String },
    /// Converted but not recorded; leave pending for reconciliation.
    Leave,
}

impl Disposition {
    pub fn outcome(&self) -> &'static str {
        match self {
            Disposition::Ack => "acked",
            Disposition::Retry { .. } => "retried",
            Disposition::Defer { .. } => "deferred",
            Disposition::DeadLetter { .. } => "dead_lettered",
            Disposition::Leave => "left",
        }
    }
}

/// Runs conversion tasks against the ledger, media tools and queue.
pub struct TaskOrchestrator {
    ledger: Arc<dyn IdempotencyLedger>,
    gateway: Arc<dyn QueueGateway>,
    transcoder: Arc<dyn Transcoder>,
    confirmation: QueueBinding,
    owner: String,
    merge_options: MergeOptions,
    policy: RetryPolicy,
    publish_retry: RetryConfig,
}

impl TaskOrchestrator {
    /// `owner` identifies this worker in ledger claims.
    pub fn new(
        ledger: Arc<dyn IdempotencyLedger>,
        gateway: Arc<dyn QueueGateway>,
        transcoder: Arc<dyn Transcoder>,
        confirmation: QueueBinding,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            transcoder,
            confirmation,
            owner: owner.into(),
            merge_options: MergeOptions::default(),
            policy: RetryPolicy::default(),
            publish_retry: RetryConfig::new("publish_confirmation"),
        }
    }

    pub fn with_merge_options(mut self, options: MergeOptions) -> Self {
        self.merge_options = options;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_publish_retry(mut self, config: RetryConfig) -> Self {
        self.publish_retry = config;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Handle and settle one delivery.
    pub async fn process(&self, delivery: Delivery) -> Disposition {
        let started = Instant::now();
        metrics::task_started();

        let disposition = self.handle(&delivery).await;
        self.settle(delivery, disposition.clone()).await;

        metrics::task_finished();
        metrics::record_task(disposition.outcome(), started.elapsed());
        disposition
    }

    /// Run the pipeline for one delivery without settling it.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let logger = TaskLogger::new(&delivery.id, delivery.attempt);

        let task = match ConversionTask::from_body(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                let video_id = ConversionTask::partial_video_id(&delivery.body);
                let err = PipelineError::from(e);
                logger.log_error(&err.to_string());
                self.record(&err, video_id, delivery.attempt).await;
                return Disposition::DeadLetter {
                    reason: err.to_string(),
                };
            }
        };

        let logger = logger.with_video(task.video_id);
        let span = logger.create_span();
        self.run(&task, delivery, &logger).instrument(span).await
    }

    async fn run(
        &self,
        task: &ConversionTask,
        delivery: &Delivery,
        logger: &TaskLogger,
    ) -> Disposition {
        let video_id = task.video_id;
        let attempt = delivery.attempt;
        logger.log_start(&format!("converting {}", task.path.display()));

        match self.acquire(video_id).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(_) => {
                let delay = self.policy.defer_delay(delivery.deferrals);
                logger.log_progress(&format!(
                    "video claimed by another worker, deferring for {:?}",
                    delay
                ));
                return Disposition::Defer { delay };
            }
            Err(PipelineError::AlreadyProcessed(_)) => {
                logger.log_warning("video already processed, skipping");
                return Disposition::Ack;
            }
            Err(err) => {
                logger.log_error(&err.to_string());
                self.record(&err, Some(video_id), attempt).await;
                return self.after_failure(&err, attempt);
            }
        }

        if let Err(err) = self.convert(task, logger).await {
            logger.log_error(&err.to_string());
            self.record(&err, Some(video_id), attempt).await;
            self.remove_merged(task).await;
            self.release(video_id).await;
            return self.after_failure(&err, attempt);
        }

        match self.ledger.mark_processed(video_id).await {
            Ok(()) => {}
            Err(LedgerError::AlreadyMarked(_)) => {
                // An expired claim let another worker finish first; its
                // confirmation has already gone out.
                logger.log_warning("success already recorded by another worker");
                self.release(video_id).await;
                return Disposition::Ack;
            }
            Err(e) => {
                let err = PipelineError::LedgerWrite(e);
                logger.log_error(&err.to_string());
                self.record(&err, Some(video_id), attempt).await;
                // The claim stays so nobody redoes the work before reconciliation.
                return Disposition::Leave;
            }
        }

        if let Err(err) = self.notify(task).await {
            logger.log_error(&err.to_string());
            self.record(&err, Some(video_id), attempt).await;
        }

        self.release(video_id).await;
        logger.log_completion(&format!("output at {}", task.manifest_path().display()));
        Disposition::Ack
    }

    /// Check the ledger, then take the claim.
    async fn acquire(&self, video_id: VideoId) -> Result<ClaimOutcome, PipelineError> {
        if self.ledger.is_processed(video_id).await {
            return Err(PipelineError::AlreadyProcessed(video_id));
        }
        match self.ledger.claim(video_id, &self.owner).await {
            Ok(ClaimOutcome::AlreadyProcessed) => Err(PipelineError::AlreadyProcessed(video_id)),
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(PipelineError::DatabaseQuery(e)),
        }
    }

    async fn convert(&self, task: &ConversionTask, logger: &TaskLogger) -> Result<(), PipelineError> {
        let merged = merge_chunks(task.source_dir(), &task.merged_file(), &self.merge_options)
            .await
            .map_err(PipelineError::Merge)?;
        logger.log_progress(&format!(
            "merged {} chunks ({} bytes)",
            merged.chunks, merged.bytes
        ));

        let output = self
            .transcoder
            .transcode(&merged.output, &task.output_dir())
            .await
            .map_err(PipelineError::Transcode)?;
        logger.log_progress(&format!("manifest written to {}", output.manifest.display()));
        Ok(())
    }

    async fn notify(&self, task: &ConversionTask) -> Result<(), PipelineError> {
        let body = ConfirmationMessage::from(task)
            .to_bytes()
            .map_err(|e| PipelineError::Publish(QueueError::publish_failed(e.to_string())))?;

        match retry_async(&self.publish_retry, || {
            self.gateway.publish(&self.confirmation, &body)
        })
        .await
        {
            RetryResult::Success(_) => Ok(()),
            RetryResult::Failed { error, attempts } => {
                warn!(
                    video_id = %task.video_id,
                    "Confirmation not published after {} attempts", attempts
                );
                Err(PipelineError::Publish(error))
            }
        }
    }

    fn after_failure(&self, err: &PipelineError, attempt: u32) -> Disposition {
        if !err.is_retryable() {
            return Disposition::DeadLetter {
                reason: err.to_string(),
            };
        }
        match self.policy.decide(attempt) {
            RetryDecision::Requeue { delay, .. } => Disposition::Retry { delay },
            RetryDecision::DeadLetter => Disposition::DeadLetter {
                reason: format!("giving up after {} attempts: {}", attempt + 1, err),
            },
        }
    }

    async fn record(&self, err: &PipelineError, video_id: Option<VideoId>, attempt: u32) {
        metrics::record_stage_failure(err.stage());
        let context = ErrorContext::new(err.stage(), err.summary())
            .with_video(video_id)
            .with_output(err.captured_output())
            .with_attempt(attempt);
        self.ledger.record_error(context, err).await;
    }

    async fn remove_merged(&self, task: &ConversionTask) {
        let merged = task.merged_file();
        match tokio::fs::remove_file(&merged).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial merge {}: {}", merged.display(), e),
        }
    }

    async fn release(&self, video_id: VideoId) {
        if let Err(e) = self.ledger.release(video_id, &self.owner).await {
            warn!(video_id = %video_id, "Failed to release claim: {}", e);
        }
    }

    /// Apply a disposition to the queue. Consumes the delivery so it cannot be
    /// settled twice.
    pub async fn settle(&self, delivery: Delivery, disposition: Disposition) {
        let result = match disposition {
            Disposition::Ack => self.gateway.ack(&delivery).await,
            Disposition::Retry { delay } => {
                let attempt = delivery.attempt.saturating_add(1);
                let deferrals = delivery.deferrals;
                self.requeue_after(delivery, attempt, deferrals, delay).await
            }
            Disposition::Defer { delay } => {
                let attempt = delivery.attempt;
                let deferrals = delivery.deferrals.saturating_add(1);
                self.requeue_after(delivery, attempt, deferrals, delay).await
            }
            Disposition::DeadLetter { reason } => {
                self.gateway.dead_letter(&delivery, &reason).await
            }
            Disposition::Leave => {
                warn!(delivery_id = %delivery.id, "Leaving delivery unacknowledged");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Failed to settle delivery: {}", e);
            metrics::record_stage_failure(ErrorStage::Settle);
            let context = ErrorContext::new(ErrorStage::Settle, "failed to settle delivery");
            self.ledger.record_error(context, &e).await;
        }
    }

    /// Requeue now, or from a background task once `delay` has passed so the
    /// worker slot is freed. Until then the original stays pending and is
    /// reclaimed if this process dies.
    async fn requeue_after(
        &self,
        delivery: Delivery,
        attempt: u32,
        deferrals: u32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.gateway.requeue(&delivery, attempt, deferrals).await;
        }

        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = gateway.requeue(&delivery, attempt, deferrals).await {
                error!(delivery_id = %delivery.id, "Failed to requeue delivery: {}", e);
            }
        });
        Ok(())
    }
}
