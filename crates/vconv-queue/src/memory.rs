//! In-process gateway used by tests.
//!
//! Mirrors the stream semantics of the Redis gateway: unread entries, a
//! pending list of delivered-but-unsettled entries, and a dead-letter list.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::binding::QueueBinding;
use crate::error::{QueueError, QueueResult};
use crate::gateway::{Delivery, QueueGateway};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    body: Vec<u8>,
    attempt: u32,
    deferrals: u32,
}

#[derive(Default)]
struct Stream {
    unread: VecDeque<Entry>,
    pending: HashMap<String, (Entry, String, Instant)>,
    published: Vec<Vec<u8>>,
    dead: Vec<(Delivery, String)>,
}

#[derive(Default)]
struct State {
    streams: HashMap<QueueBinding, Stream>,
    next_id: u64,
    acked: Vec<String>,
    requeued: Vec<(String, u32)>,
    fail_publish: bool,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}-0", self.next_id)
    }

    fn push(&mut self, binding: &QueueBinding, body: Vec<u8>, attempt: u32, deferrals: u32) -> String {
        let id = self.next_id();
        self.streams
            .entry(binding.clone())
            .or_default()
            .unread
            .push_back(Entry {
                id: id.clone(),
                body,
                attempt,
                deferrals,
            });
        id
    }

    fn settle(&mut self, delivery: &Delivery) -> QueueResult<Entry> {
        self.streams
            .get_mut(&delivery.binding)
            .and_then(|s| s.pending.remove(&delivery.id))
            .map(|(entry, _, _)| entry)
            .ok_or_else(|| QueueError::NotPending(delivery.id.clone()))
    }
}

/// Gateway holding every binding's stream in memory.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a raw body as if an upstream producer had published it.
    pub fn push(&self, binding: &QueueBinding, body: impl Into<Vec<u8>>) -> String {
        let id = self.lock().push(binding, body.into(), 0, 0);
        self.notify.notify_waiters();
        id
    }

    /// Make `publish` fail.
    pub fn fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    /// Every body published through `publish` on a binding.
    pub fn published(&self, binding: &QueueBinding) -> Vec<Vec<u8>> {
        self.lock()
            .streams
            .get(binding)
            .map(|s| s.published.clone())
            .unwrap_or_default()
    }

    /// Ids of acknowledged deliveries in settlement order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// `(original id, new attempt)` for each requeue.
    pub fn requeued(&self) -> Vec<(String, u32)> {
        self.lock().requeued.clone()
    }

    /// Dead-lettered deliveries with their reasons.
    pub fn dead_letters(&self, binding: &QueueBinding) -> Vec<(Delivery, String)> {
        self.lock()
            .streams
            .get(binding)
            .map(|s| s.dead.clone())
            .unwrap_or_default()
    }

    /// Delivered but unsettled entries.
    pub fn pending_count(&self, binding: &QueueBinding) -> usize {
        self.lock()
            .streams
            .get(binding)
            .map_or(0, |s| s.pending.len())
    }

    /// Entries not yet delivered to any consumer.
    pub fn unread_count(&self, binding: &QueueBinding) -> usize {
        self.lock()
            .streams
            .get(binding)
            .map_or(0, |s| s.unread.len())
    }

    fn take(&self, binding: &QueueBinding, consumer: &str, max: usize) -> Vec<Delivery> {
        let mut state = self.lock();
        let stream = state.streams.entry(binding.clone()).or_default();
        let count = max.min(stream.unread.len());

        stream
            .unread
            .drain(..count)
            .collect::<Vec<_>>()
            .into_iter()
            .map(|entry| {
                let delivery = Delivery {
                    id: entry.id.clone(),
                    binding: binding.clone(),
                    body: entry.body.clone(),
                    attempt: entry.attempt,
                    deferrals: entry.deferrals,
                };
                stream
                    .pending
                    .insert(entry.id.clone(), (entry, consumer.to_string(), Instant::now()));
                delivery
            })
            .collect()
    }
}

#[async_trait]
impl QueueGateway for MemoryGateway {
    async fn publish(&self, binding: &QueueBinding, payload: &[u8]) -> QueueResult<String> {
        let id = {
            let mut state = self.lock();
            if state.fail_publish {
                return Err(QueueError::publish_failed("simulated publish failure"));
            }
            let id = state.push(binding, payload.to_vec(), 0, 0);
            state
                .streams
                .entry(binding.clone())
                .or_default()
                .published
                .push(payload.to_vec());
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn consume(
        &self,
        binding: &QueueBinding,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        // Register interest before checking so a push in between is not missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let deliveries = self.take(binding, consumer, max);
        if !deliveries.is_empty() || block.is_zero() {
            return Ok(deliveries);
        }

        let _ = tokio::time::timeout(block, notified).await;
        Ok(self.take(binding, consumer, max))
    }

    async fn claim_stale(
        &self,
        binding: &QueueBinding,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock();
        let Some(stream) = state.streams.get_mut(binding) else {
            return Ok(Vec::new());
        };

        let mut stale: Vec<&mut (Entry, String, Instant)> = stream
            .pending
            .values_mut()
            .filter(|pending| pending.2.elapsed() >= min_idle)
            .collect();
        stale.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        Ok(stale
            .into_iter()
            .take(max)
            .map(|(entry, owner, at)| {
                *owner = consumer.to_string();
                *at = Instant::now();
                Delivery {
                    id: entry.id.clone(),
                    binding: binding.clone(),
                    body: entry.body.clone(),
                    attempt: entry.attempt,
                    deferrals: entry.deferrals,
                }
            })
            .collect())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.lock();
        state.settle(delivery)?;
        state.acked.push(delivery.id.clone());
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, attempt: u32, deferrals: u32) -> QueueResult<()> {
        {
            let mut state = self.lock();
            let entry = state.settle(delivery)?;
            state.push(&delivery.binding, entry.body, attempt, deferrals);
            state.requeued.push((delivery.id.clone(), attempt));
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut state = self.lock();
        state.settle(delivery)?;
        if let Some(stream) = state.streams.get_mut(&delivery.binding) {
            stream.dead.push((delivery.clone(), reason.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> QueueBinding {
        QueueBinding::new("conversion_exchange", "conversion", "video_conversion_queue")
    }

    #[tokio::test]
    async fn test_consume_moves_to_pending() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.push(&b, r#"{"video_id":1,"path":"/tmp/1"}"#);
        gateway.push(&b, r#"{"video_id":2,"path":"/tmp/2"}"#);

        let first = gateway.consume(&b, "c1", 1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(gateway.pending_count(&b), 1);
        assert_eq!(gateway.unread_count(&b), 1);

        gateway.ack(&first[0]).await.unwrap();
        assert_eq!(gateway.pending_count(&b), 0);
        assert_eq!(gateway.acked(), vec![first[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_settling_twice_fails() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.push(&b, "x");
        let delivery = gateway
            .consume(&b, "c1", 10, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);

        gateway.ack(&delivery).await.unwrap();
        assert!(matches!(
            gateway.ack(&delivery).await,
            Err(QueueError::NotPending(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_increments_attempt() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.push(&b, "body");
        let delivery = gateway
            .consume(&b, "c1", 10, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);

        gateway.requeue(&delivery, 1, 0).await.unwrap();
        let again = gateway.consume(&b, "c1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempt, 1);
        assert_eq!(again[0].deferrals, 0);
        assert_eq!(again[0].body, b"body");
        assert_ne!(again[0].id, delivery.id);
        assert_eq!(gateway.requeued(), vec![(delivery.id.clone(), 1)]);
    }

    #[tokio::test]
    async fn test_requeue_carries_deferrals() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.push(&b, "body");
        let delivery = gateway
            .consume(&b, "c1", 10, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(delivery.deferrals, 0);

        gateway.requeue(&delivery, 0, 3).await.unwrap();
        let again = gateway.consume(&b, "c1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(again[0].attempt, 0);
        assert_eq!(again[0].deferrals, 3);
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.push(&b, "not json");
        let delivery = gateway
            .consume(&b, "c1", 10, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);

        gateway.dead_letter(&delivery, "malformed").await.unwrap();
        let dead = gateway.dead_letters(&b);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, "malformed");
        assert_eq!(gateway.pending_count(&b), 0);
        assert!(gateway.acked().is_empty());
    }

    #[tokio::test]
    async fn test_claim_stale_reassigns() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.push(&b, "body");
        let original = gateway.consume(&b, "crashed", 10, Duration::ZERO).await.unwrap();
        assert_eq!(original.len(), 1);

        let none = gateway
            .claim_stale(&b, "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(none.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let claimed = gateway
            .claim_stale(&b, "c2", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, original[0].id);
    }

    #[tokio::test]
    async fn test_consume_wakes_on_push() {
        let gateway = std::sync::Arc::new(MemoryGateway::new());
        let b = binding();

        let producer = {
            let gateway = gateway.clone();
            let b = b.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gateway.push(&b, "late");
            })
        };

        let got = gateway
            .consume(&b, "c1", 1, Duration::from_secs(5))
            .await
            .unwrap();
        producer.await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_switch() {
        let gateway = MemoryGateway::new();
        let b = binding();
        gateway.fail_publish(true);
        assert!(gateway.publish(&b, b"x").await.is_err());
        gateway.fail_publish(false);
        gateway.publish(&b, b"x").await.unwrap();
        assert_eq!(gateway.published(&b), vec![b"x".to_vec()]);
    }
}
