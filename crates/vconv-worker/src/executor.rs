//! Task executor.
//!
//! A fixed pool of workers pulls deliveries from a bounded intake channel.
//! The consume loop only reads as many messages as the intake has room for,
//! so while every worker is busy unread messages stay in the stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vconv_queue::{Delivery, QueueBinding, QueueGateway};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::orchestrator::TaskOrchestrator;
use crate::retry::FailureTracker;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);
const MAX_LOGGED_FAILURES: u32 = 5;

/// Consumes the conversion queue and feeds a bounded worker pool.
pub struct TaskExecutor {
    config: WorkerConfig,
    orchestrator: Arc<TaskOrchestrator>,
    gateway: Arc<dyn QueueGateway>,
    binding: QueueBinding,
    consumer: String,
    shutdown: watch::Sender<bool>,
}

impl TaskExecutor {
    pub fn new(
        config: WorkerConfig,
        orchestrator: Arc<TaskOrchestrator>,
        gateway: Arc<dyn QueueGateway>,
        binding: QueueBinding,
        consumer: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            orchestrator,
            gateway,
            binding,
            consumer: consumer.into(),
            shutdown,
        }
    }

    /// Signal shutdown. Sticky, so it also stops a `run` that has not
    /// started yet.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until [`shutdown`](Self::shutdown) is called, then drain in-flight
    /// work for at most the configured shutdown timeout.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' on {} with {} workers",
            self.consumer, self.binding, self.config.max_concurrent_tasks
        );

        let (tx, rx) = mpsc::channel::<Delivery>(self.config.intake_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.max_concurrent_tasks {
            let rx = Arc::clone(&rx);
            let orchestrator = Arc::clone(&self.orchestrator);
            workers.spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    match next {
                        Some(delivery) => {
                            orchestrator.process(delivery).await;
                        }
                        None => break,
                    }
                }
                debug!("Worker {} stopped", worker_id);
            });
        }

        let reclaim = tokio::spawn(Self::reclaim_loop(
            Arc::clone(&self.gateway),
            self.binding.clone(),
            self.consumer.clone(),
            self.config.claim_interval,
            self.config.claim_min_idle,
            tx.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping intake");
                        break;
                    }
                }
                result = self.consume_once(&tx) => {
                    match result {
                        Ok(_) => failures.record_success(),
                        Err(WorkerError::IntakeClosed) => break,
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming deliveries: {}", e);
                            }
                            tokio::select! {
                                _ = shutdown_rx.changed() => {}
                                _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = reclaim.await {
            warn!("Reclaim loop ended abnormally: {}", e);
        }
        drop(tx);

        info!("Waiting for in-flight tasks to complete...");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Shutdown timeout reached with {} workers busy; their deliveries stay pending",
                workers.len()
            );
            workers.abort_all();
        }

        info!("Task executor stopped");
        Ok(())
    }

    /// Read as many deliveries as the intake has room for.
    async fn consume_once(&self, tx: &mpsc::Sender<Delivery>) -> WorkerResult<usize> {
        // Waits while the pool is saturated.
        let permit = tx.reserve().await.map_err(|_| WorkerError::IntakeClosed)?;
        let room = tx.capacity() + 1;

        let deliveries = self
            .gateway
            .consume(&self.binding, &self.consumer, room, self.config.consume_block)
            .await?;

        let count = deliveries.len();
        let mut deliveries = deliveries.into_iter();
        let Some(first) = deliveries.next() else {
            return Ok(0);
        };

        debug!("Consumed {} deliveries", count);
        permit.send(first);
        for delivery in deliveries {
            tx.send(delivery).await.map_err(|_| WorkerError::IntakeClosed)?;
        }
        Ok(count)
    }

    /// Periodically take over deliveries orphaned by crashed workers.
    async fn reclaim_loop(
        gateway: Arc<dyn QueueGateway>,
        binding: QueueBinding,
        consumer: String,
        interval: Duration,
        min_idle: Duration,
        tx: mpsc::Sender<Delivery>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            // Shutdown may have been signalled before this loop subscribed.
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = ticker.tick() => {
                    let room = tx.capacity();
                    if room == 0 {
                        continue;
                    }
                    match gateway.claim_stale(&binding, &consumer, min_idle, room).await {
                        Ok(deliveries) => {
                            failures.record_success();
                            if deliveries.is_empty() {
                                continue;
                            }
                            info!("Reclaimed {} stale deliveries", deliveries.len());
                            metrics::record_reclaimed(deliveries.len());
                            for delivery in deliveries {
                                if tx.send(delivery).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to reclaim stale deliveries: {}", e);
                            }
                        }
                    }
                }
            }
        }
        debug!("Reclaim loop stopped");
    }
}
