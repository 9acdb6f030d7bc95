//! In-process ledger used by tests and local runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;
use vconv_models::{ProcessErrorRecord, ProcessedVideoRecord, VideoId};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{ClaimOutcome, ErrorContext, IdempotencyLedger};

#[derive(Default)]
struct State {
    processed: Vec<ProcessedVideoRecord>,
    errors: Vec<ProcessErrorRecord>,
    claims: HashMap<VideoId, (String, Instant)>,
    fail_reads: bool,
    fail_mark_processed: bool,
}

/// Ledger with the same semantics as the Postgres one, held in memory.
pub struct MemoryLedger {
    state: Mutex<State>,
    claim_ttl: Duration,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(7200))
    }
}

impl MemoryLedger {
    pub fn new(claim_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            claim_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a success record without going through a claim.
    pub fn insert_processed(&self, video_id: VideoId) {
        self.lock().processed.push(ProcessedVideoRecord::success(video_id));
    }

    /// Make `is_processed` behave as if the database were unreachable.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make `mark_processed` fail with a query error.
    pub fn fail_mark_processed(&self, fail: bool) {
        self.lock().fail_mark_processed = fail;
    }

    pub fn processed_rows(&self) -> Vec<ProcessedVideoRecord> {
        self.lock().processed.clone()
    }

    pub fn error_records(&self) -> Vec<ProcessErrorRecord> {
        self.lock().errors.clone()
    }

    /// Current claim holders by video.
    pub fn claims(&self) -> HashMap<VideoId, String> {
        self.lock()
            .claims
            .iter()
            .map(|(id, (owner, _))| (*id, owner.clone()))
            .collect()
    }
}

fn has_success(state: &State, video_id: VideoId) -> bool {
    state.processed.iter().any(|r| r.video_id == video_id)
}

#[async_trait]
impl IdempotencyLedger for MemoryLedger {
    async fn is_processed(&self, video_id: VideoId) -> bool {
        let state = self.lock();
        if state.fail_reads {
            warn!(video_id = %video_id, "Simulated read failure, assuming not processed");
            return false;
        }
        has_success(&state, video_id)
    }

    async fn claim(&self, video_id: VideoId, owner: &str) -> LedgerResult<ClaimOutcome> {
        let mut state = self.lock();

        // A live claim blocks every owner, the holder included.
        if let Some((_, at)) = state.claims.get(&video_id) {
            if at.elapsed() < self.claim_ttl {
                return Ok(ClaimOutcome::Busy);
            }
        }

        if has_success(&state, video_id) {
            state.claims.remove(&video_id);
            return Ok(ClaimOutcome::AlreadyProcessed);
        }

        state
            .claims
            .insert(video_id, (owner.to_string(), Instant::now()));
        Ok(ClaimOutcome::Claimed)
    }

    async fn release(&self, video_id: VideoId, owner: &str) -> LedgerResult<()> {
        let mut state = self.lock();
        if state
            .claims
            .get(&video_id)
            .is_some_and(|(holder, _)| holder == owner)
        {
            state.claims.remove(&video_id);
        }
        Ok(())
    }

    async fn mark_processed(&self, video_id: VideoId) -> LedgerResult<()> {
        let mut state = self.lock();
        if state.fail_mark_processed {
            return Err(LedgerError::query_failed("simulated insert failure"));
        }
        if has_success(&state, video_id) {
            return Err(LedgerError::AlreadyMarked(video_id));
        }
        state.processed.push(ProcessedVideoRecord::success(video_id));
        Ok(())
    }

    async fn record_error(
        &self,
        context: ErrorContext,
        cause: &(dyn std::error::Error + Send + Sync),
    ) {
        let details = context.into_details(cause);
        self.lock().errors.push(ProcessErrorRecord::new(details));
    }
}
