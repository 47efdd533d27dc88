// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::OpmlError;

/// One feed subscription found in an OPML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlEntry {
    pub feed_url: String,
    pub title: Option<String>,
}

/// Parse an OPML subscription list
///
/// Collects every `outline` with an `xmlUrl` attribute, at any nesting depth.
/// Outlines without one (usually folders) are skipped.
pub fn parse_opml(bytes: &[u8]) -> Result<Vec<OpmlEntry>, OpmlError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|source| OpmlError::Malformed {
                position: reader.buffer_position(),
                source,
            })?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = e.local_name();
                if name.as_ref() == b"opml" {
                    saw_root = true;
                } else if name.as_ref() == b"outline" {
                    let entry = read_outline(e).map_err(|source| OpmlError::Malformed {
                        position: reader.buffer_position(),
                        source,
                    })?;
                    entries.extend(entry);
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    if !saw_root {
        return Err(OpmlError::NotOpml);
    }

    Ok(entries)
}

fn read_outline(element: &BytesStart<'_>) -> Result<Option<OpmlEntry>, quick_xml::Error> {
    let mut feed_url = None;
    let mut title = None;
    let mut text = None;

    for attr in element.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.trim().to_string();
        if value.is_empty() {
            continue;
        }

        match attr.key.as_ref() {
            b"xmlUrl" => feed_url = Some(value),
            b"title" => title = Some(value),
            b"text" => text = Some(value),
            _ => {}
        }
    }

    Ok(feed_url.map(|feed_url| OpmlEntry {
        feed_url,
        title: title.or(text),
    }))
}
