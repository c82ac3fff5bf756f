//! Feed page state and the time-bucket rollover.
//!
//! `feed_state` holds the single open page; rolling over retires it inside
//! one transaction: the state row is replaced with a fresh page id and the
//! new page is appended to the `feeds` chain with `previous` pointing at the
//! retired page. Once a successor exists, the retired page never receives
//! another event, which is the immutability the HTTP cache headers on
//! archived pages rely on.

use chrono::{DateTime, Datelike, Timelike, Utc};
use sqlx::{PgPool, Row};
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;

/// The single `feed_state` row: the currently open page and its hour bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub feedid: String,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
}

impl FeedState {
    fn bucket(t: DateTime<Utc>) -> (i32, i32, i32, i32) {
        (t.year(), t.month() as i32, t.day() as i32, t.hour() as i32)
    }

    /// Whether `now` has moved past this page's hour bucket.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        Self::bucket(now) > (self.year, self.month, self.day, self.hour)
    }
}

/// Read the current feed state, if any page has been opened yet.
pub async fn read_feed_state(pool: &PgPool) -> Result<Option<FeedState>, sqlx::Error> {
    let row = sqlx::query("SELECT feedid, year, month, day, hour FROM feed_state")
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        Ok(FeedState {
            feedid: row.try_get("feedid")?,
            year: row.try_get("year")?,
            month: row.try_get("month")?,
            day: row.try_get("day")?,
            hour: row.try_get("hour")?,
        })
    })
    .transpose()
}

/// Retire the current page and open a new one, in a single transaction:
/// replace the `feed_state` row and append the new page to `feeds` with
/// `previous` pointing at the retired page (NULL for the very first page).
pub async fn rollover(
    pool: &PgPool,
    clock: &dyn Clock,
    last: Option<&FeedState>,
) -> Result<FeedState, sqlx::Error> {
    let now = clock.now();
    let (year, month, day, hour) = FeedState::bucket(now);
    let feedid = Uuid::new_v4().to_string();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM feed_state").execute(&mut *tx).await?;

    sqlx::query(
        "INSERT INTO feed_state (feedid, year, month, day, hour) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&feedid)
    .bind(year)
    .bind(month)
    .bind(day)
    .bind(hour)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO feeds (feedid, previous) VALUES ($1, $2)")
        .bind(&feedid)
        .bind(last.map(|l| l.feedid.as_str()))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    match last {
        Some(last) => info!(
            feedid = %feedid,
            previous = %last.feedid,
            "Rolled over to new feed page"
        ),
        None => info!(feedid = %feedid, "Opened first feed page"),
    }

    Ok(FeedState {
        feedid,
        year,
        month,
        day,
        hour,
    })
}

/// Roll over when the clock has left the current page's hour bucket, or
/// bootstrap the first page when none exists.
pub async fn advance_if_stale(
    pool: &PgPool,
    clock: &dyn Clock,
    current: Option<FeedState>,
) -> Result<FeedState, sqlx::Error> {
    match current {
        None => {
            info!("No feed state read, opening first feed page");
            rollover(pool, clock, None).await
        }
        Some(fs) if fs.is_stale(clock.now()) => rollover(pool, clock, Some(&fs)).await,
        Some(fs) => Ok(fs),
    }
}

/// Shared handle to the id of the currently open page. The rollover hook
/// writes it; the feed data writer reads it at each insert.
#[derive(Clone, Default)]
pub struct CurrentFeed(Arc<RwLock<Option<String>>>);

impl CurrentFeed {
    pub fn get(&self) -> Option<String> {
        self.0.read().expect("current feed lock poisoned").clone()
    }

    pub fn set(&self, feedid: String) {
        *self.0.write().expect("current feed lock poisoned") = Some(feedid);
    }
}

/// Publisher poll hook: before every outbox poll, read-or-bootstrap the
/// feed state, roll over when stale, and publish the open page id to the
/// writer.
pub struct FeedRollover {
    clock: Arc<dyn Clock>,
    state: tokio::sync::Mutex<Option<FeedState>>,
    current: CurrentFeed,
}

impl FeedRollover {
    pub fn new(clock: Arc<dyn Clock>, current: CurrentFeed) -> Self {
        Self {
            clock,
            state: tokio::sync::Mutex::new(None),
            current,
        }
    }
}

#[async_trait::async_trait]
impl outbox_publisher::PollHook for FeedRollover {
    async fn before_poll(&self, pool: &PgPool) -> anyhow::Result<()> {
        let mut cached = self.state.lock().await;

        let last = match cached.take() {
            Some(fs) => Some(fs),
            None => read_feed_state(pool).await?,
        };

        let fs = advance_if_stale(pool, self.clock.as_ref(), last).await?;
        self.current.set(fs.feedid.clone());
        *cached = Some(fs);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state_at(year: i32, month: i32, day: i32, hour: i32) -> FeedState {
        FeedState {
            feedid: "feed-0".to_string(),
            year,
            month,
            day,
            hour,
        }
    }

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn same_hour_is_not_stale() {
        let fs = state_at(2024, 1, 1, 10);
        assert!(!fs.is_stale(at(2024, 1, 1, 10, 0)));
        assert!(!fs.is_stale(at(2024, 1, 1, 10, 59)));
    }

    #[test]
    fn next_hour_is_stale() {
        let fs = state_at(2024, 1, 1, 10);
        assert!(fs.is_stale(at(2024, 1, 1, 11, 0)));
    }

    #[test]
    fn later_day_and_year_are_stale_even_with_smaller_hour() {
        let fs = state_at(2024, 1, 1, 23);
        assert!(fs.is_stale(at(2024, 1, 2, 0, 0)));

        let fs = state_at(2024, 12, 31, 23);
        assert!(fs.is_stale(at(2025, 1, 1, 0, 0)));
    }

    #[test]
    fn earlier_clock_is_not_stale() {
        let fs = state_at(2024, 1, 1, 10);
        assert!(!fs.is_stale(at(2024, 1, 1, 9, 59)));
    }

    #[test]
    fn current_feed_handle_shares_updates() {
        let current = CurrentFeed::default();
        let reader = current.clone();

        assert_eq!(reader.get(), None);
        current.set("feed-1".to_string());
        assert_eq!(reader.get(), Some("feed-1".to_string()));
    }
}
