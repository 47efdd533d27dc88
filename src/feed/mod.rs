mod fetch;
mod opml;
mod parse;

pub use fetch::{fetch_feed, fetch_feed_bytes, read_feed_file};
pub use opml::{OpmlEntry, parse_opml};
pub use parse::{ParsedEpisode, ParsedFeed, parse_duration, parse_feed};
