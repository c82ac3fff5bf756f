//! Read-side queries over the feed tables. The server never writes; the
//! feed builder owns every mutation.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// A row of the `feeds` archive chain.
#[derive(Debug, Clone)]
pub struct FeedLink {
    pub feedid: String,
    pub previous: Option<String>,
}

/// One event assigned to a feed page.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub aggregate_id: String,
    pub version: i32,
    pub typecode: String,
    pub payload: Vec<u8>,
    pub event_time: DateTime<Utc>,
}

/// The id of the currently open page, if any page exists yet.
pub async fn current_feed(pool: &PgPool) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT feedid FROM feed_state")
        .fetch_optional(pool)
        .await
}

/// Look up a page in the archive chain.
pub async fn feed_link(pool: &PgPool, feedid: &str) -> Result<Option<FeedLink>, sqlx::Error> {
    let row = sqlx::query("SELECT feedid, previous FROM feeds WHERE feedid = $1")
        .bind(feedid)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        Ok(FeedLink {
            feedid: row.try_get("feedid")?,
            previous: row.try_get("previous")?,
        })
    })
    .transpose()
}

/// The successor page: the row whose `previous` points at `feedid`. Its
/// existence is what makes `feedid` immutable.
pub async fn next_feed(pool: &PgPool, feedid: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT feedid FROM feeds WHERE previous = $1")
        .bind(feedid)
        .fetch_optional(pool)
        .await
}

/// Entries of a page, newest insertion first.
pub async fn feed_entries(pool: &PgPool, feedid: &str) -> Result<Vec<FeedEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT aggregate_id, version, typecode, payload, event_time
        FROM feed_data
        WHERE feedid = $1
        ORDER BY id DESC
        "#,
    )
    .bind(feedid)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(FeedEntry {
                aggregate_id: row.try_get("aggregate_id")?,
                version: row.try_get("version")?,
                typecode: row.try_get("typecode")?,
                payload: row.try_get("payload")?,
                event_time: row.try_get("event_time")?,
            })
        })
        .collect()
}

/// A single event from the authoritative store.
pub async fn load_event(
    pool: &PgPool,
    aggregate_id: &str,
    version: i32,
) -> Result<Option<FeedEntry>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT typecode, payload, event_time
        FROM events
        WHERE aggregate_id = $1 AND version = $2
        "#,
    )
    .bind(aggregate_id)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(FeedEntry {
            aggregate_id: aggregate_id.to_string(),
            version,
            typecode: row.try_get("typecode")?,
            payload: row.try_get("payload")?,
            event_time: row.try_get("event_time")?,
        })
    })
    .transpose()
}
