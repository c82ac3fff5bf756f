//! Atom wire model for the event feed.
//!
//! The feed server renders these documents and the replicator parses them
//! back; payload bytes travel base64-encoded in the entry content with the
//! entry's `type` attribute carrying the event typecode. Entry ids follow
//! the `urn:esid:{aggregate_id}:{version}` scheme.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The standard Atom namespace.
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Namespace of the single-entry event document.
pub const EVENT_NS: &str = "http://xtraclabs.com/eventstore";

const ENTRY_ID_PREFIX: &str = "urn:esid";

/// Result type alias for wire-format operations.
pub type AtomResult<T> = Result<T, AtomError>;

/// Errors raised while rendering or parsing feed documents.
#[derive(Error, Debug)]
pub enum AtomError {
    #[error("xml render error: {0}")]
    Render(#[from] quick_xml::SeError),

    #[error("xml parse error: {0}")]
    Parse(#[from] quick_xml::DeError),

    #[error("malformed entry id: {0}")]
    InvalidEntryId(String),

    #[error("payload decode error: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// A rel/href pair on a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomLink {
    #[serde(rename = "@rel")]
    pub rel: String,
    #[serde(rename = "@href")]
    pub href: String,
}

/// Entry content: base64 payload tagged with the event typecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomContent {
    #[serde(rename = "@type")]
    pub content_type: String,
    #[serde(rename = "$text", default)]
    pub body: String,
}

/// One event rendered into a feed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomEntry {
    pub id: String,
    pub title: String,
    pub published: String,
    pub content: AtomContent,
}

impl AtomEntry {
    /// Build an entry from the raw event fields, encoding the payload.
    pub fn from_event(
        aggregate_id: &str,
        version: i32,
        typecode: &str,
        payload: &[u8],
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: entry_id(aggregate_id, version),
            title: "event".to_string(),
            published: format_time(event_time),
            content: AtomContent {
                content_type: typecode.to_string(),
                body: general_purpose::STANDARD.encode(payload),
            },
        }
    }

    /// The `(aggregate_id, version)` identity encoded in the entry id.
    pub fn event_key(&self) -> AtomResult<(String, i32)> {
        parse_entry_id(&self.id)
    }

    /// The payload bytes, base64-decoded from the content body.
    pub fn payload(&self) -> AtomResult<Vec<u8>> {
        Ok(general_purpose::STANDARD.decode(self.content.body.trim())?)
    }
}

/// A feed page: the head or an archived page of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "feed")]
pub struct AtomFeed {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    pub title: String,
    pub id: String,
    pub updated: String,
    #[serde(rename = "link", default)]
    pub links: Vec<AtomLink>,
    #[serde(rename = "entry", default)]
    pub entries: Vec<AtomEntry>,
}

impl AtomFeed {
    pub fn new(id: impl Into<String>, title: impl Into<String>, updated: DateTime<Utc>) -> Self {
        Self {
            xmlns: ATOM_NS.to_string(),
            title: title.into(),
            id: id.into(),
            updated: format_time(updated),
            links: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_link(mut self, rel: impl Into<String>, href: impl Into<String>) -> Self {
        self.links.push(AtomLink {
            rel: rel.into(),
            href: href.into(),
        });
        self
    }

    pub fn with_entries(mut self, entries: Vec<AtomEntry>) -> Self {
        self.entries = entries;
        self
    }

    /// The href of the first link with the given rel, if any.
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.href.as_str())
    }

    /// The `previous` link used to walk the archive.
    pub fn previous(&self) -> Option<&str> {
        self.link("previous")
    }

    /// Render the page as an Atom XML document.
    pub fn to_xml(&self) -> AtomResult<String> {
        let body = quick_xml::se::to_string(self)?;
        Ok(format!("{}{}", XML_DECLARATION, body))
    }

    /// Parse a page fetched off the wire.
    pub fn from_xml(xml: &str) -> AtomResult<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }
}

/// The standalone single-entry document served at
/// `/notifications/{aggregate_id}/{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "event")]
pub struct EventDocument {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    #[serde(rename = "aggregateId")]
    pub aggregate_id: String,
    pub version: i32,
    pub published: String,
    pub typecode: String,
    pub content: String,
}

impl EventDocument {
    pub fn from_event(
        aggregate_id: &str,
        version: i32,
        typecode: &str,
        payload: &[u8],
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            xmlns: EVENT_NS.to_string(),
            aggregate_id: aggregate_id.to_string(),
            version,
            published: format_time(event_time),
            typecode: typecode.to_string(),
            content: general_purpose::STANDARD.encode(payload),
        }
    }

    pub fn to_xml(&self) -> AtomResult<String> {
        let body = quick_xml::se::to_string(self)?;
        Ok(format!("{}{}", XML_DECLARATION, body))
    }

    pub fn from_xml(xml: &str) -> AtomResult<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }
}

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

/// Entry id for an event: `urn:esid:{aggregate_id}:{version}`.
pub fn entry_id(aggregate_id: &str, version: i32) -> String {
    format!("{}:{}:{}", ENTRY_ID_PREFIX, aggregate_id, version)
}

/// Split an entry id back into `(aggregate_id, version)`. The id must have
/// exactly four colon-separated parts.
pub fn parse_entry_id(id: &str) -> AtomResult<(String, i32)> {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() != 4 || parts[0] != "urn" || parts[1] != "esid" {
        return Err(AtomError::InvalidEntryId(id.to_string()));
    }
    let version: i32 = parts[3]
        .parse()
        .map_err(|_| AtomError::InvalidEntryId(id.to_string()))?;
    Ok((parts[2].to_string(), version))
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap()
    }

    #[test]
    fn entry_id_round_trips() {
        let id = entry_id("1234-5678", 7);
        assert_eq!(id, "urn:esid:1234-5678:7");
        assert_eq!(parse_entry_id(&id).unwrap(), ("1234-5678".to_string(), 7));
    }

    #[test]
    fn malformed_entry_ids_are_rejected() {
        for bad in [
            "",
            "urn:esid:agg",
            "urn:esid:agg:notanumber",
            "urn:other:agg:1",
            "esid:agg:1:2",
        ] {
            assert!(parse_entry_id(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn feed_renders_links_and_namespace() {
        let feed = AtomFeed::new("feed-1", "Event store feed", sample_time())
            .with_link("self", "http://localhost:5000/notifications/recent")
            .with_link("previous", "http://localhost:5000/notifications/feed-0");

        let xml = feed.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("xmlns=\"http://www.w3.org/2005/Atom\""));
        assert!(xml.contains("rel=\"previous\""));
        assert!(xml.contains("href=\"http://localhost:5000/notifications/feed-0\""));
    }

    #[test]
    fn feed_round_trips_through_xml() {
        let entry = AtomEntry::from_event("agg-1", 3, "tc", b"the payload", sample_time());
        let feed = AtomFeed::new("feed-1", "Event store feed", sample_time())
            .with_link("self", "http://localhost:5000/notifications/feed-1")
            .with_entries(vec![entry]);

        let xml = feed.to_xml().unwrap();
        let parsed = AtomFeed::from_xml(&xml).unwrap();
        assert_eq!(parsed, feed);
    }

    #[test]
    fn payload_survives_base64_round_trip() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let entry = AtomEntry::from_event("agg", 1, "bin", &payload, sample_time());

        assert_eq!(entry.content.content_type, "bin");
        assert_eq!(entry.payload().unwrap(), payload);
        assert_eq!(entry.event_key().unwrap(), ("agg".to_string(), 1));
    }

    #[test]
    fn link_lookup_by_rel() {
        let feed = AtomFeed::new("feed-1", "Event store feed", sample_time())
            .with_link("self", "/notifications/feed-1")
            .with_link("next", "/notifications/feed-2");

        assert_eq!(feed.link("next"), Some("/notifications/feed-2"));
        assert_eq!(feed.previous(), None);
    }

    #[test]
    fn event_document_round_trips() {
        let doc = EventDocument::from_event("agg-9", 2, "tc", b"payload bytes", sample_time());
        let xml = doc.to_xml().unwrap();

        assert!(xml.contains("xmlns=\"http://xtraclabs.com/eventstore\""));
        assert!(xml.contains("<aggregateId>agg-9</aggregateId>"));

        let parsed = EventDocument::from_xml(&xml).unwrap();
        assert_eq!(parsed, doc);
    }
}
