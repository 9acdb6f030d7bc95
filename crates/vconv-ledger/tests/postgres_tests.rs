//! Postgres ledger integration tests.

use std::time::Duration;

use vconv_ledger::{ClaimOutcome, DatabaseConfig, ErrorContext, IdempotencyLedger, LedgerError, PgLedger};
use vconv_models::{ErrorStage, VideoId};

async fn connect() -> PgLedger {
    dotenvy::dotenv().ok();
    let ledger = PgLedger::connect(&DatabaseConfig::from_env())
        .await
        .expect("Failed to connect to postgres");
    ledger.ensure_schema().await.expect("Failed to create schema");
    ledger
}

fn unique_video_id() -> VideoId {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    VideoId((nanos % i64::MAX as u128) as i64)
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_mark_processed_is_unique() {
    let ledger = connect().await;
    let id = unique_video_id();

    assert!(!ledger.is_processed(id).await);
    ledger.mark_processed(id).await.expect("first insert");
    assert!(ledger.is_processed(id).await);

    let second = ledger.mark_processed(id).await;
    assert!(matches!(second, Err(LedgerError::AlreadyMarked(_))));
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_claim_lifecycle() {
    let ledger = connect().await;
    let id = unique_video_id();

    assert_eq!(ledger.claim(id, "worker-a").await.unwrap(), ClaimOutcome::Claimed);
    assert_eq!(ledger.claim(id, "worker-b").await.unwrap(), ClaimOutcome::Busy);

    ledger.release(id, "worker-a").await.unwrap();
    assert_eq!(ledger.claim(id, "worker-b").await.unwrap(), ClaimOutcome::Claimed);

    ledger.mark_processed(id).await.unwrap();
    ledger.release(id, "worker-b").await.unwrap();
    assert_eq!(
        ledger.claim(id, "worker-c").await.unwrap(),
        ClaimOutcome::AlreadyProcessed
    );
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_expired_claim_is_taken_over() {
    dotenvy::dotenv().ok();
    let config = DatabaseConfig {
        claim_ttl: Duration::from_secs(1),
        ..DatabaseConfig::from_env()
    };
    let ledger = PgLedger::connect(&config).await.expect("connect");
    ledger.ensure_schema().await.expect("schema");
    let id = unique_video_id();

    assert_eq!(ledger.claim(id, "worker-a").await.unwrap(), ClaimOutcome::Claimed);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(ledger.claim(id, "worker-b").await.unwrap(), ClaimOutcome::Claimed);
    ledger.release(id, "worker-b").await.unwrap();
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_record_error_writes_row() {
    let ledger = connect().await;
    let id = unique_video_id();
    let cause = std::io::Error::other("exit status 1");

    ledger
        .record_error(
            ErrorContext::new(ErrorStage::Transcode, "failed to convert video")
                .with_video(Some(id))
                .with_output(Some("Invalid data found when processing input".to_string())),
            &cause,
        )
        .await;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM process_errors_log WHERE (error_details->>'video_id')::bigint = $1",
    )
    .bind(id.as_i64())
    .fetch_one(ledger.pool())
    .await
    .unwrap();
    assert_eq!(count, 1);
}
