//! Transactional outbox publisher.
//!
//! Writers append events to the `events` table and mirror a `(aggregate_id,
//! version)` row into the `publish` outbox in the same transaction. This
//! library drains the outbox: it polls a locked batch, dispatches each event
//! to every registered [`EventProcessor`], and deletes a row inside the
//! polling transaction only when **all** processors succeeded for that
//! event. Rows whose processing failed stay put and are retried on the next
//! poll, so processors must be idempotent with respect to
//! `(aggregate_id, version)`.
//!
//! Multiple publisher instances may run against the same database. The poll
//! statement locks its batch with `FOR UPDATE SKIP LOCKED`, so concurrent
//! instances receive disjoint batches and a given row is processed by at
//! most one instance at a time; the delete inside the same transaction
//! removes the contention entirely once a row is drained.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use outbox_publisher::{Event, EventProcessor, OutboxPublisher, ProcessorRegistry};
//! use db_pool::ConnectSpec;
//! use sqlx::PgPool;
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventProcessor for Printer {
//!     async fn initialize(&self, _pool: &PgPool) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!     async fn process(&self, _pool: &PgPool, event: &Event) -> anyhow::Result<()> {
//!         println!("{}.{}", event.aggregate_id, event.version);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Arc::new(ProcessorRegistry::new());
//! registry.register("printer", Arc::new(Printer));
//!
//! let spec = ConnectSpec::from_env()?;
//! let publisher = OutboxPublisher::connect(&spec, 5, registry).await?;
//! publisher.initialize_processors().await?;
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! publisher.process_events(true, shutdown).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod metrics;
mod registry;

pub use error::{PublishError, PublishResult};
pub use metrics::PublisherMetrics;
pub use registry::ProcessorRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db_pool::{ConnectSpec, Db};
use serde::{Deserialize, Serialize};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A fully loaded event ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Source entity identifier
    pub aggregate_id: String,
    /// Monotonic version within the aggregate, starting at 1
    pub version: i32,
    /// Opaque payload type tag
    pub typecode: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Timestamp assigned by the upstream store
    pub event_time: DateTime<Utc>,
}

/// An outbox row: the identity of an event pending publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKey {
    pub aggregate_id: String,
    pub version: i32,
}

/// A unit of event consumption: initialized once per publisher instance,
/// invoked once per event. Implementations must be idempotent per
/// `(aggregate_id, version)` because failed batches are retried.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Called once at publisher startup, before any event is dispatched.
    async fn initialize(&self, pool: &PgPool) -> anyhow::Result<()>;

    /// Called per event. An error leaves the outbox row in place for retry.
    async fn process(&self, pool: &PgPool, event: &Event) -> anyhow::Result<()>;
}

/// Seam run at the top of every loop iteration, before the batch is polled.
/// The feed builder uses this to perform its time-bucket rollover check.
/// Errors are logged and the iteration is retried.
#[async_trait]
pub trait PollHook: Send + Sync {
    async fn before_poll(&self, pool: &PgPool) -> anyhow::Result<()>;
}

/// Publisher loop tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Rows locked per poll
    pub batch_size: i64,
    /// Sleep between polls when the outbox is empty
    pub poll_interval: Duration,
    /// Consecutive failed iterations tolerated before aborting
    pub max_consecutive_errors: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            max_consecutive_errors: 100,
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// A batch was polled and the transaction committed. `deleted` counts
    /// rows drained (all processors succeeded); `processed` counts events
    /// dispatched, including ones whose row was retained for retry.
    Committed { processed: usize, deleted: usize },
    /// The outbox was empty; the transaction was rolled back.
    Empty,
}

/// The transactional outbox publisher engine.
pub struct OutboxPublisher {
    db: Db,
    registry: Arc<ProcessorRegistry>,
    config: PublisherConfig,
    poll_hook: Option<Arc<dyn PollHook>>,
    metrics: Option<PublisherMetrics>,
}

impl OutboxPublisher {
    /// Connect to the event store and build a publisher over `registry`.
    pub async fn connect(
        spec: &ConnectSpec,
        max_retries: u32,
        registry: Arc<ProcessorRegistry>,
    ) -> PublishResult<Self> {
        let db = Db::connect(spec, max_retries).await?;
        Ok(Self::new(db, registry))
    }

    /// Build a publisher over an already connected gateway.
    pub fn new(db: Db, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            db,
            registry,
            config: PublisherConfig::default(),
            poll_hook: None,
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the per-iteration hook run before each poll.
    pub fn with_poll_hook(mut self, hook: Arc<dyn PollHook>) -> Self {
        self.poll_hook = Some(hook);
        self
    }

    pub fn with_metrics(mut self, metrics: PublisherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Run every registered processor's one-time initialization.
    pub async fn initialize_processors(&self) -> PublishResult<()> {
        for (name, processor) in self.registry.snapshot() {
            processor
                .initialize(self.db.pool())
                .await
                .map_err(|source| PublishError::ProcessorInit {
                    name: name.clone(),
                    source,
                })?;
            debug!(processor = %name, "Processor initialized");
        }
        Ok(())
    }

    /// Poll one locked batch of outbox rows inside `tx`, in ascending
    /// version order. Concurrent publishers skip rows locked here.
    pub async fn poll_events(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> PublishResult<Vec<EventKey>> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_id, version
            FROM publish
            ORDER BY version
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.config.batch_size)
        .fetch_all(&mut **tx)
        .await?;

        let keys = rows
            .into_iter()
            .map(|row| {
                Ok(EventKey {
                    aggregate_id: row.try_get("aggregate_id")?,
                    version: row.try_get("version")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(count = keys.len(), "Polled outbox batch");
        Ok(keys)
    }

    /// Load the full event for an outbox row. `None` when the outbox points
    /// at a missing event, which signals a store-side bug.
    pub async fn retrieve_event(
        &self,
        aggregate_id: &str,
        version: i32,
    ) -> PublishResult<Option<Event>> {
        let key = EventKey {
            aggregate_id: aggregate_id.to_string(),
            version,
        };
        Ok(fetch_event(self.db.pool(), &key).await?)
    }

    /// Delete a drained outbox row within the polling transaction.
    pub async fn delete_processed(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &EventKey,
    ) -> PublishResult<()> {
        sqlx::query("DELETE FROM publish WHERE aggregate_id = $1 AND version = $2")
            .bind(&key.aggregate_id)
            .bind(key.version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Number of rows currently pending in the outbox.
    pub async fn pending_count(&self) -> PublishResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM publish")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// One straight-line loop iteration: poll, dispatch, delete, commit.
    pub async fn process_batch(&self) -> PublishResult<BatchOutcome> {
        let processors = self.registry.snapshot();
        if processors.is_empty() {
            return Err(PublishError::NoProcessorsRegistered);
        }

        let mut tx = self.db.begin().await?;

        let batch = self.poll_events(&mut tx).await?;
        if batch.is_empty() {
            tx.rollback().await?;
            return Ok(BatchOutcome::Empty);
        }

        let mut processed = 0usize;
        let mut deleted = 0usize;

        for key in &batch {
            let event = match fetch_event(&mut *tx, key).await? {
                Some(event) => event,
                None => {
                    // The orphaned row stays put for investigation.
                    warn!(
                        aggregate_id = %key.aggregate_id,
                        version = key.version,
                        "Outbox row has no matching event, skipping"
                    );
                    continue;
                }
            };

            let mut all_ok = true;
            for (name, processor) in &processors {
                if let Err(e) = processor.process(self.db.pool(), &event).await {
                    warn!(
                        processor = %name,
                        aggregate_id = %event.aggregate_id,
                        version = event.version,
                        error = ?e,
                        "Processor failed, event will be retried"
                    );
                    all_ok = false;
                }
            }
            processed += 1;

            // All-or-nothing: the row is drained only when every processor
            // succeeded for this event.
            if all_ok {
                self.delete_processed(&mut tx, key).await?;
                deleted += 1;
            }
        }

        tx.commit().await?;

        if let Some(metrics) = &self.metrics {
            metrics.published.inc_by(deleted as u64);
        }

        Ok(BatchOutcome::Committed { processed, deleted })
    }

    /// The outer loop. With `run_loop` false, performs a single iteration
    /// (test support). The shutdown signal is honored between batches only;
    /// a batch in flight always commits or rolls back as a unit.
    pub async fn process_events(
        &self,
        run_loop: bool,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> PublishResult<()> {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Outbox publisher starting"
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping publisher loop");
                break;
            }

            if let Some(hook) = &self.poll_hook {
                if let Err(e) = hook.before_poll(self.db.pool()).await {
                    warn!(error = ?e, "Poll hook failed");
                    consecutive_errors += 1;
                    if consecutive_errors > self.config.max_consecutive_errors {
                        return Err(PublishError::TooManyFailures {
                            consecutive: consecutive_errors,
                        });
                    }
                    if !run_loop {
                        break;
                    }
                    self.idle_sleep(&mut shutdown).await;
                    continue;
                }
            }

            match self.process_batch().await {
                Ok(BatchOutcome::Committed { processed, deleted }) => {
                    consecutive_errors = 0;
                    info!(processed, deleted, "Batch committed");
                }
                Ok(BatchOutcome::Empty) => {
                    debug!("Outbox empty");
                    if run_loop {
                        self.idle_sleep(&mut shutdown).await;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        error = %e,
                        consecutive_errors,
                        "Publisher iteration failed"
                    );
                    if e.is_connection_error() {
                        if let Err(re) = self.db.reconnect().await {
                            warn!(error = %re, "Reconnect attempt failed");
                        }
                    }
                    if consecutive_errors > self.config.max_consecutive_errors {
                        return Err(PublishError::TooManyFailures {
                            consecutive: consecutive_errors,
                        });
                    }
                }
            }

            if let Some(metrics) = &self.metrics {
                if let Ok(pending) = self.pending_count().await {
                    metrics.pending.set(pending);
                }
            }

            if !run_loop {
                break;
            }
        }

        Ok(())
    }

    async fn idle_sleep(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn fetch_event<'e, E>(executor: E, key: &EventKey) -> Result<Option<Event>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT typecode, payload, event_time
        FROM events
        WHERE aggregate_id = $1 AND version = $2
        "#,
    )
    .bind(&key.aggregate_id)
    .bind(key.version)
    .fetch_optional(executor)
    .await?;

    row.map(|row| {
        Ok(Event {
            aggregate_id: key.aggregate_id.clone(),
            version: key.version,
            typecode: row.try_get("typecode")?,
            payload: row.try_get("payload")?,
            event_time: row.try_get("event_time")?,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_contract() {
        let config = PublisherConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_consecutive_errors, 100);
    }

    #[test]
    fn batch_outcome_is_comparable() {
        assert_eq!(
            BatchOutcome::Committed {
                processed: 3,
                deleted: 3
            },
            BatchOutcome::Committed {
                processed: 3,
                deleted: 3
            }
        );
        assert_ne!(
            BatchOutcome::Empty,
            BatchOutcome::Committed {
                processed: 0,
                deleted: 0
            }
        );
    }
}
