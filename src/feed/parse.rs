// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};

use crate::error::FeedError;

/// A podcast feed as parsed from RSS, before it is merged into the store
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub image_url: Option<String>,
    pub episodes: Vec<ParsedEpisode>,
}

/// A single `<item>` of a feed
///
/// Every field except the title is optional; a feed with sparse items still
/// parses.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEpisode {
    pub title: String,
    pub guid: Option<String>,
    /// Publication time in epoch milliseconds
    pub pub_date: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub audio_url: Option<String>,
    pub description: Option<String>,
}

const UNTITLED_PODCAST: &str = "Untitled Podcast";
const UNTITLED_EPISODE: &str = "Untitled Episode";

/// Parse RSS feed XML bytes into a [`ParsedFeed`]
///
/// Only a document that is not RSS at all fails; missing optional fields on
/// individual items are tolerated and unknown elements are ignored.
pub fn parse_feed(xml_bytes: &[u8]) -> Result<ParsedFeed, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let episodes = channel.items().iter().map(parse_episode).collect();

    let image_url = channel
        .image()
        .map(|img| img.url().to_string())
        .or_else(|| {
            channel
                .itunes_ext()
                .and_then(|ext| ext.image())
                .map(String::from)
        })
        .filter(|url| !url.trim().is_empty());

    let title = Some(channel.title().trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED_PODCAST)
        .to_string();

    Ok(ParsedFeed {
        title,
        image_url,
        episodes,
    })
}

fn parse_episode(item: &rss::Item) -> ParsedEpisode {
    let title = item
        .title()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED_EPISODE)
        .to_string();

    let pub_date = item.pub_date().and_then(|date_str| {
        DateTime::parse_from_rfc2822(date_str.trim())
            .ok()
            .or_else(|| parse_relaxed_date(date_str.trim()))
            .map(|dt| dt.timestamp_millis())
    });

    let guid = item
        .guid()
        .map(|g| g.value().trim().to_string())
        .filter(|g| !g.is_empty());

    ParsedEpisode {
        title,
        guid,
        pub_date,
        duration_seconds: item
            .itunes_ext()
            .and_then(|ext| ext.duration())
            .and_then(parse_duration),
        audio_url: item
            .enclosure()
            .map(|enclosure| enclosure.url().trim().to_string())
            .filter(|url| !url.is_empty()),
        description: item.description().map(String::from),
    }
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt);
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
}

/// Parse an `itunes:duration` value into whole seconds
///
/// Accepts `SS`, `MM:SS`, `HH:MM:SS` and fractional seconds.
pub fn parse_duration(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total = 0.0_f64;
    for part in &parts {
        let value: f64 = part.trim().parse().ok()?;
        if value < 0.0 || !value.is_finite() {
            return None;
        }
        total = total * 60.0 + value;
    }

    Some(total.floor() as i64)
}
