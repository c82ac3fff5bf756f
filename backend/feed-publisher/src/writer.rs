//! The `feed data writer` processor: assigns each published event to the
//! currently open feed page.

use anyhow::Context;
use async_trait::async_trait;
use outbox_publisher::{Event, EventProcessor};
use sqlx::PgPool;
use tracing::debug;

use crate::rollover::CurrentFeed;

/// Registration name of the writer processor.
pub const FEED_WRITER_NAME: &str = "feed data writer";

/// Inserts one `feed_data` row per event under the feed id current at the
/// moment of assignment. Idempotent per `(aggregate_id, version)`: a
/// retried event never lands on a second page.
pub struct FeedDataWriter {
    current: CurrentFeed,
}

impl FeedDataWriter {
    pub fn new(current: CurrentFeed) -> Self {
        Self { current }
    }
}

#[async_trait]
impl EventProcessor for FeedDataWriter {
    async fn initialize(&self, _pool: &PgPool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process(&self, pool: &PgPool, event: &Event) -> anyhow::Result<()> {
        let feedid = self
            .current
            .get()
            .context("no feed page open; rollover has not run")?;

        sqlx::query(
            r#"
            INSERT INTO feed_data (feedid, aggregate_id, version, event_time, typecode, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (aggregate_id, version) DO NOTHING
            "#,
        )
        .bind(&feedid)
        .bind(&event.aggregate_id)
        .bind(event.version)
        .bind(event.event_time)
        .bind(&event.typecode)
        .bind(&event.payload)
        .execute(pool)
        .await
        .context("failed to insert feed data row")?;

        debug!(
            feedid = %feedid,
            aggregate_id = %event.aggregate_id,
            version = event.version,
            "Event assigned to feed page"
        );

        Ok(())
    }
}
