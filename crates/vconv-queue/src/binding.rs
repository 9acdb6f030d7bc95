//! Queue bindings and connection configuration.

use std::fmt;

/// A direct exchange, routing key and the queue bound to them.
///
/// On Redis the exchange and routing key name the stream and the queue names
/// the consumer group reading it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

impl QueueBinding {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
        }
    }

    /// Stream carrying messages routed through this binding.
    pub fn stream_key(&self) -> String {
        format!("{}.{}", self.exchange, self.routing_key)
    }

    /// Stream receiving messages that exhausted their attempts.
    pub fn dead_stream_key(&self) -> String {
        format!("{}.dead", self.stream_key())
    }
}

impl fmt::Display for QueueBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.stream_key(), self.queue)
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub url: String,
    /// Where conversion tasks arrive
    pub conversion: QueueBinding,
    /// Where completion notices are published
    pub confirmation: QueueBinding,
    /// Consumer name within the group, unique per worker process
    pub consumer: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            conversion: QueueBinding::new(
                "conversion_exchange",
                "conversion",
                "video_conversion_queue",
            ),
            confirmation: QueueBinding::new(
                "conversion_exchange",
                "finish-conversion",
                "video_confirmation_queue",
            ),
            consumer: default_consumer_name(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let conversion_exchange = std::env::var("CONVERSION_EXCHANGE")
            .unwrap_or_else(|_| defaults.conversion.exchange.clone());

        Self {
            url: std::env::var("QUEUE_URL").unwrap_or(defaults.url),
            conversion: QueueBinding::new(
                conversion_exchange.clone(),
                std::env::var("CONVERSION_KEY").unwrap_or(defaults.conversion.routing_key),
                std::env::var("CONVERSION_QUEUE").unwrap_or(defaults.conversion.queue),
            ),
            confirmation: QueueBinding::new(
                std::env::var("CONFIRMATION_EXCHANGE").unwrap_or(conversion_exchange),
                std::env::var("CONFIRMATION_KEY").unwrap_or(defaults.confirmation.routing_key),
                std::env::var("CONFIRMATION_QUEUE").unwrap_or(defaults.confirmation.queue),
            ),
            consumer: std::env::var("WORKER_ID").unwrap_or(defaults.consumer),
        }
    }
}

fn default_consumer_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_keys() {
        let binding = QueueBinding::new("conversion_exchange", "conversion", "video_conversion_queue");
        assert_eq!(binding.stream_key(), "conversion_exchange.conversion");
        assert_eq!(binding.dead_stream_key(), "conversion_exchange.conversion.dead");
    }

    #[test]
    fn test_default_bindings_share_exchange() {
        let config = QueueConfig::default();
        assert_eq!(config.conversion.exchange, config.confirmation.exchange);
        assert_ne!(config.conversion.stream_key(), config.confirmation.stream_key());
        assert!(config.consumer.starts_with("worker-"));
    }
}
