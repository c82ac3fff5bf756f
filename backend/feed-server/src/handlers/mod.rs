//! HTTP handlers for the notification feed resources.
//!
//! Cache headers track immutability: a page with a successor never changes
//! again and is served with a month-long `max-age` plus an `ETag`; the head
//! is mutable until rollover and carries no cache headers at all.

use actix_web::{web, HttpResponse};
use atom_feed::{AtomEntry, AtomFeed, EventDocument};
use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use crate::db::{self, FeedEntry};
use crate::error::{AppError, Result};
use crate::links::LinkBuilder;

pub const FEED_TITLE: &str = "Event store feed";
const IMMUTABLE_CACHE_CONTROL: &str = "max-age=2592000";
const ATOM_CONTENT_TYPE: &str = "application/atom+xml";

/// Shared handler state.
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub links: LinkBuilder,
}

pub async fn health() -> &'static str {
    "OK"
}

/// `GET /notifications/recent`: the mutable head of the feed.
pub async fn recent_feed(state: web::Data<AppState>) -> Result<HttpResponse> {
    let current = match db::current_feed(&state.pool).await? {
        Some(feedid) => feedid,
        // Nothing to feed yet: no page has been opened.
        None => return Ok(HttpResponse::NoContent().finish()),
    };

    let previous = db::feed_link(&state.pool, &current)
        .await?
        .and_then(|link| link.previous);
    let entries = db::feed_entries(&state.pool, &current).await?;

    let mut feed = AtomFeed::new(&current, FEED_TITLE, truncate_to_hour(Utc::now()))
        .with_link("self", state.links.recent())
        .with_link("via", state.links.feed(&current));
    if let Some(previous) = previous {
        feed = feed.with_link("previous", state.links.feed(&previous));
    }
    let feed = feed.with_entries(render_entries(entries));

    debug!(feedid = %current, "Serving head feed page");

    // The head mutates until rollover: no cache headers.
    Ok(HttpResponse::Ok()
        .content_type(ATOM_CONTENT_TYPE)
        .body(feed.to_xml()?))
}

/// `GET /notifications/{feedid}`: an archived (or the current) page.
pub async fn archived_feed(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let feedid = path.into_inner();

    let link = db::feed_link(&state.pool, &feedid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("feed {}", feedid)))?;
    let next = db::next_feed(&state.pool, &feedid).await?;
    let entries = db::feed_entries(&state.pool, &feedid).await?;

    let updated = entries
        .first()
        .map(|e| e.event_time)
        .unwrap_or_else(Utc::now);

    let mut feed = AtomFeed::new(&feedid, FEED_TITLE, updated)
        .with_link("self", state.links.feed(&feedid));
    if let Some(previous) = &link.previous {
        feed = feed.with_link("previous", state.links.feed(previous));
    }
    if let Some(next) = &next {
        feed = feed.with_link("next", state.links.feed(next));
    }
    let feed = feed.with_entries(render_entries(entries));

    debug!(feedid = %feedid, immutable = next.is_some(), "Serving feed page");

    let mut response = HttpResponse::Ok();
    response.content_type(ATOM_CONTENT_TYPE);
    // A page with a successor can never change again.
    if next.is_some() {
        response.insert_header(("Cache-Control", IMMUTABLE_CACHE_CONTROL));
        response.insert_header(("ETag", feedid.clone()));
    }
    Ok(response.body(feed.to_xml()?))
}

/// `GET /notifications/{aggregate_id}/{version}`: a single entry.
pub async fn event_entry(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (aggregate_id, version) = path.into_inner();
    let version: i32 = version
        .parse()
        .map_err(|_| AppError::BadRequest(format!("version '{}' is not numeric", version)))?;

    let event = db::load_event(&state.pool, &aggregate_id, version)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {}:{}", aggregate_id, version)))?;

    let doc = EventDocument::from_event(
        &event.aggregate_id,
        event.version,
        &event.typecode,
        &event.payload,
        event.event_time,
    );

    // An event never changes once stored.
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .insert_header(("Cache-Control", IMMUTABLE_CACHE_CONTROL))
        .insert_header(("ETag", format!("{}:{}", aggregate_id, version)))
        .body(doc.to_xml()?))
}

fn render_entries(entries: Vec<FeedEntry>) -> Vec<AtomEntry> {
    entries
        .iter()
        .map(|e| {
            AtomEntry::from_event(
                &e.aggregate_id,
                e.version,
                &e.typecode,
                &e.payload,
                e.event_time,
            )
        })
        .collect()
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncation_drops_sub_hour_precision() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 42, 17).unwrap();
        assert_eq!(
            truncate_to_hour(t),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }
}
