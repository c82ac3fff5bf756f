//! Feed builder service: drives the outbox publisher with the hour-bucket
//! rollover hook and the `feed data writer` processor.

pub mod clock;
pub mod config;
pub mod rollover;
pub mod writer;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use rollover::{
    advance_if_stale, read_feed_state, rollover, CurrentFeed, FeedRollover, FeedState,
};
pub use writer::{FeedDataWriter, FEED_WRITER_NAME};
