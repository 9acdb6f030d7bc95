//! Gateway contract shared by the Redis and in-memory transports.

use std::time::Duration;

use async_trait::async_trait;

use crate::binding::QueueBinding;
use crate::error::QueueResult;

/// One message received from a binding. Must be settled exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport message id
    pub id: String,
    pub binding: QueueBinding,
    pub body: Vec<u8>,
    /// Zero-based count of previous failed attempts
    pub attempt: u32,
    /// Times the message was put back because its video was busy
    pub deferrals: u32,
}

/// At-least-once message transport with manual settlement.
///
/// Bindings are declared lazily and idempotently on first use.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Publish a payload, returning the transport message id.
    async fn publish(&self, binding: &QueueBinding, payload: &[u8]) -> QueueResult<String>;

    /// Receive up to `max` new deliveries, waiting at most `block` for the first.
    async fn consume(
        &self,
        binding: &QueueBinding,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>>;

    /// Take over deliveries left unsettled for at least `min_idle`.
    async fn claim_stale(
        &self,
        binding: &QueueBinding,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Acknowledge and drop a delivery.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Re-publish the body with the given counters and ack the original.
    async fn requeue(&self, delivery: &Delivery, attempt: u32, deferrals: u32) -> QueueResult<()>;

    /// Move the delivery to the binding's dead-letter stream.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;
}
