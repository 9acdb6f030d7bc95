//! Video conversion worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vconv_ledger::{DatabaseConfig, IdempotencyLedger, PgLedger};
use vconv_media::{check_ffmpeg, FfmpegTranscoder, Transcoder};
use vconv_queue::{QueueConfig, QueueGateway, RedisGateway};
use vconv_worker::{metrics, TaskExecutor, TaskOrchestrator, WorkerConfig};

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vconv-worker");

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    if let Some(port) = std::env::var("METRICS_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        metrics::init_metrics(port).context("failed to start metrics exporter")?;
        info!("Prometheus metrics enabled on port {}", port);
    }

    let ffmpeg = check_ffmpeg(&config.ffmpeg_path).context("ffmpeg is required")?;
    info!("Using ffmpeg at {}", ffmpeg.display());

    let db_config = DatabaseConfig::from_env();
    config
        .validate_claim_ttl(db_config.claim_ttl)
        .context("invalid ledger configuration")?;
    let ledger = Arc::new(
        PgLedger::connect(&db_config)
            .await
            .context("failed to connect to postgres")?,
    );
    ledger
        .ensure_schema()
        .await
        .context("failed to create ledger schema")?;

    let queue_config = QueueConfig::from_env();
    let gateway: Arc<dyn QueueGateway> = Arc::new(
        RedisGateway::connect(&queue_config.url)
            .await
            .context("failed to connect to queue")?,
    );

    let transcoder: Arc<dyn Transcoder> =
        Arc::new(FfmpegTranscoder::new(ffmpeg, config.transcode_timeout));

    let orchestrator = Arc::new(
        TaskOrchestrator::new(
            Arc::clone(&ledger) as Arc<dyn IdempotencyLedger>,
            Arc::clone(&gateway),
            transcoder,
            queue_config.confirmation.clone(),
            queue_config.consumer.clone(),
        )
        .with_merge_options(config.merge_options())
        .with_policy(config.retry_policy()),
    );

    let executor = Arc::new(TaskExecutor::new(
        config,
        orchestrator,
        gateway,
        queue_config.conversion,
        queue_config.consumer,
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await?;
    ledger.close().await;

    info!("Worker shutdown complete");
    Ok(())
}
