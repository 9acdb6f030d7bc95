//! Redis Streams gateway.
//!
//! Each binding maps to a stream `<exchange>.<routing_key>` read by the
//! consumer group named after the queue. Entries carry the raw `payload`
//! plus the `attempt` and `deferrals` counters. Settlement always acks and deletes
//! the original entry in the same MULTI block as any re-add.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::binding::QueueBinding;
use crate::error::{QueueError, QueueResult};
use crate::gateway::{Delivery, QueueGateway};

const PAYLOAD_FIELD: &str = "payload";
const ATTEMPT_FIELD: &str = "attempt";
const DEFERRALS_FIELD: &str = "deferrals";

/// Queue gateway backed by Redis Streams consumer groups.
pub struct RedisGateway {
    conn: MultiplexedConnection,
    // XREADGROUP BLOCK stalls its connection, so reads get their own.
    reader: Mutex<MultiplexedConnection>,
    declared: Mutex<HashSet<QueueBinding>>,
}

impl RedisGateway {
    /// Connect to Redis.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| QueueError::connection_failed(format!("invalid queue url: {}", e)))?;

        let mut conn = client.get_multiplexed_async_connection().await.map_err(|e| {
            QueueError::connection_failed(format!("failed to connect to {}: {}", url, e))
        })?;
        let reader = client.get_multiplexed_async_connection().await?;

        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        info!("Connected to queue at {}", url);

        Ok(Self {
            conn,
            reader: Mutex::new(reader),
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// Create the consumer group (and stream) for a binding if missing.
    pub async fn declare(&self, binding: &QueueBinding) -> QueueResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(binding) {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(binding.stream_key())
            .arg(&binding.queue)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => info!("Declared binding {}", binding),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Binding already declared: {}", binding);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        declared.insert(binding.clone());
        Ok(())
    }

    /// Number of entries currently in a binding's stream.
    pub async fn len(&self, binding: &QueueBinding) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("XLEN")
            .arg(binding.stream_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    /// Number of entries in a binding's dead-letter stream.
    pub async fn dead_len(&self, binding: &QueueBinding) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("XLEN")
            .arg(binding.dead_stream_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn forget(&self, binding: &QueueBinding) {
        self.declared.lock().await.remove(binding);
    }
}

fn to_delivery(binding: &QueueBinding, entry: &StreamId) -> Delivery {
    let body: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    let attempt: u32 = entry.get(ATTEMPT_FIELD).unwrap_or(0);
    let deferrals: u32 = entry.get(DEFERRALS_FIELD).unwrap_or(0);
    if body.is_empty() {
        warn!(delivery_id = %entry.id, "Stream entry has no payload");
    }
    Delivery {
        id: entry.id.clone(),
        binding: binding.clone(),
        body,
        attempt,
        deferrals,
    }
}

fn is_missing_group(e: &redis::RedisError) -> bool {
    e.code() == Some("NOGROUP")
}

#[async_trait]
impl QueueGateway for RedisGateway {
    async fn publish(&self, binding: &QueueBinding, payload: &[u8]) -> QueueResult<String> {
        self.declare(binding).await?;

        let mut conn = self.conn.clone();
        let message_id: String = redis::cmd("XADD")
            .arg(binding.stream_key())
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .arg(ATTEMPT_FIELD)
            .arg(0u32)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(format!("{}: {}", binding, e)))?;

        debug!("Published message {} to {}", message_id, binding.stream_key());
        Ok(message_id)
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
        self.declare(binding).await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&binding.queue)
            .arg(consumer)
            .arg("COUNT")
            .arg(max);
        // BLOCK 0 waits forever
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(binding.stream_key()).arg(">"); // Only new messages

        let mut conn = self.reader.lock().await;
        let result: Result<Option<StreamReadReply>, redis::RedisError> =
            cmd.query_async(&mut *conn).await;
        drop(conn);

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if is_missing_group(&e) => {
                warn!("Consumer group vanished for {}, redeclaring", binding);
                self.forget(binding).await;
                return Err(QueueError::ConsumeFailed(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let deliveries: Vec<Delivery> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|entry| to_delivery(binding, entry))
            .collect();

        if !deliveries.is_empty() {
            debug!("Consumed {} deliveries from {}", deliveries.len(), binding.stream_key());
        }
        Ok(deliveries)
    }

    async fn claim_stale(
        &self,
        binding: &QueueBinding,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        self.declare(binding).await?;

        let mut conn = self.conn.clone();
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(binding.stream_key())
            .arg(&binding.queue)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(binding.stream_key())
            .arg(&binding.queue)
            .arg(consumer)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }

        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;
        let deliveries: Vec<Delivery> = claimed
            .ids
            .iter()
            .map(|entry| to_delivery(binding, entry))
            .collect();

        if !deliveries.is_empty() {
            info!(
                "Claimed {} stale deliveries from {}",
                deliveries.len(),
                binding.stream_key()
            );
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let stream = delivery.binding.stream_key();
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&stream)
            .arg(&delivery.binding.queue)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(delivery_id = %delivery.id, "Acknowledged delivery");
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, attempt: u32, deferrals: u32) -> QueueResult<()> {
        let stream = delivery.binding.stream_key();
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&delivery.body)
            .arg(ATTEMPT_FIELD)
            .arg(attempt)
            .arg(DEFERRALS_FIELD)
            .arg(deferrals)
            .ignore()
            .cmd("XACK")
            .arg(&stream)
            .arg(&delivery.binding.queue)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(delivery_id = %delivery.id, attempt, deferrals, "Requeued delivery");
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let stream = delivery.binding.stream_key();
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(delivery.binding.dead_stream_key())
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&delivery.body)
            .arg(ATTEMPT_FIELD)
            .arg(delivery.attempt)
            .arg("reason")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.id)
            .ignore()
            .cmd("XACK")
            .arg(&stream)
            .arg(&delivery.binding.queue)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        warn!(delivery_id = %delivery.id, "Moved delivery to {}: {}", delivery.binding.dead_stream_key(), reason);
        Ok(())
    }
}
