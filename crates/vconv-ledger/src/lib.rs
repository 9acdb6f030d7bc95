//! Idempotency ledger for the conversion pipeline.
//!
//! This crate provides:
//! - The `IdempotencyLedger` trait (processed check, atomic claim, success
//!   record, error log)
//! - A Postgres implementation over a shared `sqlx` pool
//! - An in-memory implementation for tests and local dry runs

pub mod config;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod postgres;

pub use config::DatabaseConfig;
pub use error::{LedgerError, LedgerResult};
pub use ledger::{ClaimOutcome, ErrorContext, IdempotencyLedger};
pub use memory::MemoryLedger;
pub use postgres::PgLedger;
