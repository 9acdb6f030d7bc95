//! Redis Streams gateway integration tests.

use std::time::Duration;

use vconv_queue::{QueueBinding, QueueConfig, QueueGateway, RedisGateway};

fn test_binding(name: &str) -> QueueBinding {
    let suffix = unique_suffix();
    QueueBinding::new(
        format!("vconv_test_{}", suffix),
        name,
        format!("vconv_test_queue_{}", suffix),
    )
}

fn unique_suffix() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
        .to_string()
}

async fn connect() -> RedisGateway {
    dotenvy::dotenv().ok();
    let config = QueueConfig::from_env();
    RedisGateway::connect(&config.url)
        .await
        .expect("Failed to connect to queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_consume_ack() {
    let gateway = connect().await;
    let binding = test_binding("conversion");

    gateway
        .publish(&binding, br#"{"video_id":7,"path":"/media/uploads/7"}"#)
        .await
        .expect("Failed to publish");

    let deliveries = gateway
        .consume(&binding, "test-consumer", 10, Duration::from_millis(500))
        .await
        .expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].attempt, 0);
    assert_eq!(deliveries[0].body, br#"{"video_id":7,"path":"/media/uploads/7"}"#);

    gateway.ack(&deliveries[0]).await.expect("Failed to ack");
    assert_eq!(gateway.len(&binding).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_requeue_and_dead_letter() {
    let gateway = connect().await;
    let binding = test_binding("conversion");

    gateway.publish(&binding, b"payload").await.unwrap();
    let first = gateway
        .consume(&binding, "test-consumer", 1, Duration::from_millis(500))
        .await
        .unwrap()
        .remove(0);

    gateway.requeue(&first, 1, 2).await.unwrap();
    let second = gateway
        .consume(&binding, "test-consumer", 1, Duration::from_millis(500))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(second.attempt, 1);
    assert_eq!(second.deferrals, 2);
    assert_ne!(second.id, first.id);

    gateway.dead_letter(&second, "too many attempts").await.unwrap();
    assert_eq!(gateway.len(&binding).await.unwrap(), 0);
    assert_eq!(gateway.dead_len(&binding).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_claim_stale_after_crash() {
    let gateway = connect().await;
    let binding = test_binding("conversion");

    gateway.publish(&binding, b"payload").await.unwrap();
    let orphan = gateway
        .consume(&binding, "crashed-consumer", 1, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(orphan.len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let claimed = gateway
        .claim_stale(&binding, "rescuer", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, orphan[0].id);

    gateway.ack(&claimed[0]).await.unwrap();
}
