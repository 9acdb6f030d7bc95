//! Database configuration.

use std::fmt;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::{LedgerError, LedgerResult};

/// Postgres connection and ledger settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// libpq-style SSL mode (`disable`, `prefer`, `require`, ...)
    pub ssl_mode: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Age after which another worker may take over a claim
    pub claim_ttl: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            user: "root".to_string(),
            password: "root".to_string(),
            database: "converter".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            claim_ttl: Duration::from_secs(7200), // 2 hours
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("claim_ttl", &self.claim_ttl)
            .finish()
    }
}

impl DatabaseConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or(defaults.host),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            user: std::env::var("POSTGRES_USER").unwrap_or(defaults.user),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or(defaults.password),
            database: std::env::var("POSTGRES_DB").unwrap_or(defaults.database),
            ssl_mode: std::env::var("POSTGRES_SSLMODE").unwrap_or(defaults.ssl_mode),
            max_connections: std::env::var("POSTGRES_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            acquire_timeout: Duration::from_secs(
                std::env::var("POSTGRES_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            claim_ttl: Duration::from_secs(
                std::env::var("LEDGER_CLAIM_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7200),
            ),
        }
    }

    /// Build sqlx connect options.
    pub fn connect_options(&self) -> LedgerResult<PgConnectOptions> {
        let ssl_mode: PgSslMode = self.ssl_mode.parse().map_err(|_| {
            LedgerError::connection_failed(format!("invalid POSTGRES_SSLMODE: {}", self.ssl_mode))
        })?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(ssl_mode))
    }
}
