//! Postgres-backed ledger.
//!
//! Tables:
//! - `processed_videos`: one `success` row per converted video (unique)
//! - `process_errors_log`: append-only JSONB diagnostics for operators
//! - `video_claims`: short-lived reservations taken before any work starts

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, error, info};
use vconv_models::{ProcessStatus, VideoId};

use crate::config::DatabaseConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{ClaimOutcome, ErrorContext, IdempotencyLedger};
use crate::metrics::record_operation;

/// Idempotent schema bootstrap.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processed_videos (
    video_id BIGINT NOT NULL,
    status TEXT NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS processed_videos_success_uidx
    ON processed_videos (video_id) WHERE status = 'success';
CREATE TABLE IF NOT EXISTS process_errors_log (
    id BIGSERIAL PRIMARY KEY,
    error_details JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS video_claims (
    video_id BIGINT PRIMARY KEY,
    claimed_by TEXT NOT NULL,
    claimed_at TIMESTAMPTZ NOT NULL
)
"#;

const IS_PROCESSED_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM processed_videos WHERE video_id = $1 AND status = 'success')";

// Takes over a claim only when the current holder's claim has expired.
const CLAIM_SQL: &str = r#"
INSERT INTO video_claims (video_id, claimed_by, claimed_at)
VALUES ($1, $2, now())
ON CONFLICT (video_id) DO UPDATE
    SET claimed_by = EXCLUDED.claimed_by, claimed_at = EXCLUDED.claimed_at
    WHERE video_claims.claimed_at < now() - make_interval(secs => $3)
RETURNING video_id
"#;

/// Ledger over a shared Postgres pool.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    claim_ttl: Duration,
}

impl fmt::Debug for PgLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgLedger")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("claim_ttl", &self.claim_ttl)
            .finish()
    }
}

impl PgLedger {
    /// Connect and verify the database is reachable.
    pub async fn connect(config: &DatabaseConfig) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| {
                LedgerError::connection_failed(format!(
                    "failed to connect to postgres at {}:{}/{}: {}",
                    config.host, config.port, config.database, e
                ))
            })?;

        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| LedgerError::connection_failed(format!("health check failed: {}", e)))?;

        info!("Connected to postgres {}:{}/{}", config.host, config.port, config.database);
        Ok(Self::from_pool(pool, config.claim_ttl))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, claim_ttl: Duration) -> Self {
        Self { pool, claim_ttl }
    }

    /// Create tables and indexes if missing.
    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Ledger schema ready");
        Ok(())
    }

    /// Get connection pool reference.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn try_is_processed(&self, video_id: VideoId) -> LedgerResult<bool> {
        let processed = sqlx::query_scalar::<_, bool>(IS_PROCESSED_SQL)
            .bind(video_id.as_i64())
            .fetch_one(&self.pool)
            .await?;
        Ok(processed)
    }
}

#[async_trait]
impl IdempotencyLedger for PgLedger {
    async fn is_processed(&self, video_id: VideoId) -> bool {
        match self.try_is_processed(video_id).await {
            Ok(processed) => processed,
            Err(e) => {
                error!(
                    video_id = %video_id,
                    "Error checking if video is processed, assuming not: {}", e
                );
                record_operation("is_processed", "error");
                false
            }
        }
    }

    async fn claim(&self, video_id: VideoId, owner: &str) -> LedgerResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_scalar::<_, i64>(CLAIM_SQL)
            .bind(video_id.as_i64())
            .bind(owner)
            .bind(self.claim_ttl.as_secs_f64())
            .fetch_optional(&mut *tx)
            .await?;

        if claimed.is_none() {
            tx.commit().await?;
            record_operation("claim", "busy");
            return Ok(ClaimOutcome::Busy);
        }

        // A holder that finished between our check and our claim has already
        // committed its success row.
        let processed = sqlx::query_scalar::<_, bool>(IS_PROCESSED_SQL)
            .bind(video_id.as_i64())
            .fetch_one(&mut *tx)
            .await?;

        if processed {
            sqlx::query("DELETE FROM video_claims WHERE video_id = $1 AND claimed_by = $2")
                .bind(video_id.as_i64())
                .bind(owner)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            record_operation("claim", "already_processed");
            return Ok(ClaimOutcome::AlreadyProcessed);
        }

        tx.commit().await?;
        record_operation("claim", "claimed");
        debug!(video_id = %video_id, owner, "Claimed video");
        Ok(ClaimOutcome::Claimed)
    }

    async fn release(&self, video_id: VideoId, owner: &str) -> LedgerResult<()> {
        sqlx::query("DELETE FROM video_claims WHERE video_id = $1 AND claimed_by = $2")
            .bind(video_id.as_i64())
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_processed(&self, video_id: VideoId) -> LedgerResult<()> {
        let result = sqlx::query(
            "INSERT INTO processed_videos (video_id, status, processed_at) VALUES ($1, $2, $3)",
        )
        .bind(video_id.as_i64())
        .bind(ProcessStatus::Success.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                record_operation("mark_processed", "ok");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                record_operation("mark_processed", "duplicate");
                Err(LedgerError::AlreadyMarked(video_id))
            }
            Err(e) => {
                error!(video_id = %video_id, "Error marking video as processed: {}", e);
                record_operation("mark_processed", "error");
                Err(e.into())
            }
        }
    }

    async fn record_error(
        &self,
        context: ErrorContext,
        cause: &(dyn std::error::Error + Send + Sync),
    ) {
        let details = context.into_details(cause);

        let result = sqlx::query(
            "INSERT INTO process_errors_log (error_details, created_at) VALUES ($1, $2)",
        )
        .bind(Json(&details))
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            let serialized = serde_json::to_string(&details).unwrap_or_default();
            error!(
                original_error = %cause,
                error_details = %serialized,
                "Error registering error: {}", e
            );
            record_operation("record_error", "error");
        }
    }
}
