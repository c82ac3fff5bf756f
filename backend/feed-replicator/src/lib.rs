//! Feed replicator: walks the notification archive backwards from the head,
//! then loads it oldest-first into a local `events` table.
//!
//! The walk pushes only `previous` links, so the mutable head page itself is
//! never loaded; its events arrive on the next run, after rollover archives
//! them. Re-runs are idempotent: duplicate inserts trip the primary key and
//! are logged, not fatal. A caching reverse proxy between the replicator and
//! the feed server absorbs repeat fetches of archived pages, which carry a
//! month-long `max-age`.

use anyhow::{Context, Result};
use atom_feed::{AtomEntry, AtomFeed};
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// Default head URL, overridable with `REPLICATOR_FEED_URL`.
pub const DEFAULT_FEED_URL: &str = "http://localhost:5000/notifications/recent";

const UNIQUE_VIOLATION: &str = "23505";

/// Replication settings from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Head URL the walk starts from
    pub feed_url: String,
    /// Reconnect budget for the downstream database connection
    pub max_connect_retries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            feed_url: std::env::var("REPLICATOR_FEED_URL")
                .unwrap_or_else(|_| DEFAULT_FEED_URL.to_string()),
            max_connect_retries: std::env::var("REPLICATOR_CONNECT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// Counters for one replication run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Archive pages loaded
    pub pages: usize,
    /// Entries newly inserted downstream
    pub stored: usize,
    /// Entries skipped as already replicated
    pub duplicates: usize,
}

pub struct Replicator {
    client: reqwest::Client,
    pool: PgPool,
}

impl Replicator {
    pub fn new(client: reqwest::Client, pool: PgPool) -> Self {
        Self { client, pool }
    }

    /// Walk the archive from `head_url`, collecting `previous` links until a
    /// page without one terminates the chain. The returned list is
    /// newest-first; callers load it in reverse. Fetch failures end the walk
    /// with the pages collected so far.
    pub async fn line_up_feeds(client: &reqwest::Client, head_url: &str) -> Result<Vec<String>> {
        let mut feed_url = head_url.to_string();
        let mut feeds = Vec::new();

        loop {
            info!(url = %feed_url, "Walking feed archive");

            let body = match fetch_page(client, &feed_url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %feed_url, error = ?e, "Error reading feed, stopping walk");
                    return Ok(feeds);
                }
            };

            let feed = AtomFeed::from_xml(&body)
                .with_context(|| format!("unmarshalling feed from {}", feed_url))?;

            match feed.previous() {
                Some(previous) if !previous.is_empty() => {
                    feeds.push(previous.to_string());
                    feed_url = previous.to_string();
                }
                _ => break,
            }
        }

        Ok(feeds)
    }

    /// Fetch one archive page and store every entry. Failures are logged
    /// and the page is skipped; a re-run picks it up again.
    pub async fn process_feed(&self, feed_url: &str, summary: &mut RunSummary) {
        info!(url = %feed_url, "Loading feed page");

        let body = match fetch_page(&self.client, feed_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %feed_url, error = ?e, "Error reading feed page");
                return;
            }
        };

        let feed = match AtomFeed::from_xml(&body) {
            Ok(feed) => feed,
            Err(e) => {
                warn!(url = %feed_url, error = %e, "Error unmarshalling feed page");
                return;
            }
        };

        summary.pages += 1;

        for entry in &feed.entries {
            self.store_entry(entry, summary).await;
        }
    }

    /// Insert one entry into the local `events` table. Unique violations
    /// mean the entry was replicated by an earlier run.
    pub async fn store_entry(&self, entry: &AtomEntry, summary: &mut RunSummary) {
        let (aggregate_id, version) = match entry.event_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(id = %entry.id, error = %e, "Skipping entry with malformed id");
                return;
            }
        };

        let payload = match entry.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(id = %entry.id, error = %e, "Error decoding entry payload");
                return;
            }
        };

        let result = sqlx::query(
            "INSERT INTO events (aggregate_id, version, typecode, payload) VALUES ($1, $2, $3, $4)",
        )
        .bind(&aggregate_id)
        .bind(version)
        .bind(&entry.content.content_type)
        .bind(&payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => summary.stored += 1,
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                debug!(
                    aggregate_id = %aggregate_id,
                    version,
                    "Entry already replicated, skipping"
                );
                summary.duplicates += 1;
            }
            Err(e) => {
                warn!(
                    aggregate_id = %aggregate_id,
                    version,
                    error = %e,
                    "Error adding entry to events table"
                );
            }
        }
    }

    /// One replication pass: walk to the origin, then load forward.
    pub async fn run(&self, head_url: &str) -> Result<RunSummary> {
        let feeds = Self::line_up_feeds(&self.client, head_url).await?;
        let mut summary = RunSummary::default();

        // The walk collected pages newest-first; load oldest-first so the
        // downstream store sees versions in order.
        for feed_url in feeds.iter().rev() {
            self.process_feed(feed_url, &mut summary).await;
        }

        info!(
            pages = summary.pages,
            stored = summary.stored,
            duplicates = summary.duplicates,
            "Replication run complete"
        );

        Ok(summary)
    }
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetching {}", url))?
        .error_for_status()
        .with_context(|| format!("fetching {}", url))?;
    Ok(response.text().await?)
}
