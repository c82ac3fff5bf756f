//! Absolute link generation for feed documents.

/// Builds the absolute URLs the feed pages link to each other with.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    pub fn new(host_port: &str) -> Self {
        Self {
            base: format!("http://{}", host_port),
        }
    }

    pub fn recent(&self) -> String {
        format!("{}/notifications/recent", self.base)
    }

    pub fn feed(&self, feedid: &str) -> String {
        format!("{}/notifications/{}", self.base, feedid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_carry_the_configured_host() {
        let links = LinkBuilder::new("feeds.example.com:5000");
        assert_eq!(
            links.recent(),
            "http://feeds.example.com:5000/notifications/recent"
        );
        assert_eq!(
            links.feed("feed-1"),
            "http://feeds.example.com:5000/notifications/feed-1"
        );
    }
}
