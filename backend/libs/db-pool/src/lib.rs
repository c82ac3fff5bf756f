//! Database gateway for the event feed pipeline.
//!
//! Provides connect-string handling, pooled PostgreSQL connections with a
//! bounded reconnect budget, a connection/query failure classifier, and the
//! schema migrations runner. No other component owns a raw connection; they
//! borrow the pool from a [`Db`] handle.

mod connect;
mod error;
mod retry;

pub use connect::ConnectSpec;
pub use error::{is_connection_error, DbError, DbResult};
pub use retry::{with_retries, RetryConfig, RetryError};

use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{debug, info};

/// Workspace schema migrations (events, publish, feed tables).
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../../migrations");

/// Connection pool tuning, overridable from `DB_*` environment variables.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection creation timeout (new connection to PostgreSQL)
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    /// Connection idle timeout
    pub idle_timeout_secs: u64,
    /// Connection maximum lifetime
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl PoolSettings {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: u64| -> u64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            max_connections: var("DB_MAX_CONNECTIONS", defaults.max_connections as u64) as u32,
            min_connections: var("DB_MIN_CONNECTIONS", defaults.min_connections as u64) as u32,
            connect_timeout_secs: var("DB_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            acquire_timeout_secs: var("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout_secs),
            idle_timeout_secs: var("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            max_lifetime_secs: var("DB_MAX_LIFETIME_SECS", defaults.max_lifetime_secs),
        }
    }

    /// Log pool configuration details
    pub fn log_config(&self) {
        info!(
            "Database pool configuration: \
             max_connections={}, min_connections={}, \
             connect_timeout={}s, acquire_timeout={}s, idle_timeout={}s, max_lifetime={}s",
            self.max_connections,
            self.min_connections,
            self.connect_timeout_secs,
            self.acquire_timeout_secs,
            self.idle_timeout_secs,
            self.max_lifetime_secs
        );
    }
}

/// Handle to the pooled database connection.
///
/// All connection errors pass through the classifier; connection-class
/// failures are retried within the bounded budget, statement-class failures
/// surface immediately.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
    retry: RetryConfig,
}

impl Db {
    /// Connect with default pool settings and a retry budget of
    /// `max_retries` attempts.
    pub async fn connect(spec: &ConnectSpec, max_retries: u32) -> DbResult<Self> {
        Self::connect_with(spec, PoolSettings::from_env(), max_retries).await
    }

    /// Connect with explicit pool settings.
    pub async fn connect_with(
        spec: &ConnectSpec,
        settings: PoolSettings,
        max_retries: u32,
    ) -> DbResult<Self> {
        debug!(
            host = %spec.host,
            port = spec.port,
            service = %spec.service,
            "Creating database pool"
        );

        let retry = RetryConfig::with_max_retries(max_retries);
        let url = spec.database_url();
        let options = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(settings.max_lifetime_secs))
            .test_before_acquire(true);

        let pool = with_retries(&retry, is_connection_error, || {
            options.clone().connect(&url)
        })
        .await
        .map_err(map_retry)?;

        // Verify the pool actually serves statements before handing it out.
        match tokio::time::timeout(
            Duration::from_secs(settings.connect_timeout_secs),
            sqlx::query("SELECT 1").execute(&pool),
        )
        .await
        {
            Ok(Ok(_)) => {
                info!(service = %spec.service, "Database pool created and verified");
                Ok(Self { pool, retry })
            }
            Ok(Err(e)) => Err(DbError::Sqlx(e)),
            Err(_) => Err(DbError::Sqlx(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "database verification timeout",
            )))),
        }
    }

    /// Wrap an existing pool (test support).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
        }
    }

    /// Borrow the pool for statement execution via `sqlx::query(...)`.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction, retrying connection-class acquisition failures
    /// within the bounded budget.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Postgres>> {
        with_retries(&self.retry, is_connection_error, || self.pool.begin())
            .await
            .map_err(map_retry)
    }

    /// Re-establish connectivity after a connection-class failure. The pool
    /// replaces broken connections on acquire; this drives that within the
    /// retry budget.
    pub async fn reconnect(&self) -> DbResult<()> {
        with_retries(&self.retry, is_connection_error, || {
            sqlx::query("SELECT 1").execute(&self.pool)
        })
        .await
        .map(|_| ())
        .map_err(map_retry)
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn map_retry(err: RetryError<sqlx::Error>) -> DbError {
    match err {
        RetryError::MaxRetriesExceeded { retries, source } => {
            DbError::ConnectionExhausted { retries, source }
        }
        RetryError::NotRetryable(e) => DbError::Sqlx(e),
    }
}

/// Apply the workspace schema migrations.
pub async fn migrate(pool: &PgPool) -> DbResult<()> {
    debug!("Running database migrations");
    MIGRATOR.run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn default_pool_settings() {
        for var in [
            "DB_MAX_CONNECTIONS",
            "DB_MIN_CONNECTIONS",
            "DB_CONNECT_TIMEOUT_SECS",
            "DB_ACQUIRE_TIMEOUT_SECS",
            "DB_IDLE_TIMEOUT_SECS",
            "DB_MAX_LIFETIME_SECS",
        ] {
            std::env::remove_var(var);
        }

        let settings = PoolSettings::from_env();
        assert_eq!(settings.max_connections, 10);
        assert_eq!(settings.min_connections, 2);
        assert_eq!(settings.connect_timeout_secs, 5);
        assert_eq!(settings.acquire_timeout_secs, 10);
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_pool_settings() {
        std::env::set_var("DB_MAX_CONNECTIONS", "40");
        std::env::set_var("DB_MIN_CONNECTIONS", "8");

        let settings = PoolSettings::from_env();
        assert_eq!(settings.max_connections, 40);
        assert_eq!(settings.min_connections, 8);

        std::env::remove_var("DB_MAX_CONNECTIONS");
        std::env::remove_var("DB_MIN_CONNECTIONS");
    }

    #[test]
    #[serial_test::serial]
    fn unparseable_override_falls_back_to_default() {
        std::env::set_var("DB_MAX_CONNECTIONS", "not-a-number");

        let settings = PoolSettings::from_env();
        assert_eq!(settings.max_connections, 10);

        std::env::remove_var("DB_MAX_CONNECTIONS");
    }
}
