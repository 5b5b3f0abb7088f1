//! Feed Service: feed refresh and episode upsert (§4.6). RSS/Atom parsing
//! itself is out of scope (non-goal) — this module consumes already-parsed
//! items and owns only the merge/upsert contract and duration parsing.

use chrono::{DateTime, Utc};
use podliner_proto::model::{canonicalize_url, Episode, Feed, FeedId};
use podliner_proto::Library;

use crate::error::FeedError;

/// A normalised feed item as produced by the (external, out of scope) feed
/// parser — the only shape this module depends on.
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub audio_url: String,
    pub rss_guid: Option<String>,
    pub title: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub duration_raw: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ParsedFeedDocument {
    pub title: Option<String>,
    pub items: Vec<ParsedItem>,
}

/// Inserts the feed (canonicalising its URL) if it isn't already present by
/// canonical URL, returning its id either way (§4.6 AddFeed).
pub fn add_feed(library: &mut Library, url: &str) -> FeedId {
    let canonical = canonicalize_url(url);
    if let Some(existing) = library
        .feeds
        .iter()
        .find(|f| f.url.eq_ignore_ascii_case(&canonical))
    {
        return existing.id;
    }
    let feed = Feed::new(url);
    let id = feed.id;
    library.feeds.push(feed);
    id
}

/// Applies a parsed feed document to the library: upserts feed metadata and
/// every item within it (§4.6 RefreshFeed). `fetch_ok` distinguishes a
/// successful-but-empty document from a transport failure — `LastChecked`
/// is updated in both cases, but item upsert is skipped on failure.
pub fn refresh_feed(
    library: &mut Library,
    feed_id: FeedId,
    document: Result<ParsedFeedDocument, FeedError>,
) {
    let now = Utc::now();
    let Some(feed) = library.feeds.iter_mut().find(|f| f.id == feed_id) else {
        return;
    };
    feed.last_checked = Some(now);

    let document = match document {
        Ok(doc) => doc,
        Err(_) => return,
    };

    if feed.title.is_empty() {
        if let Some(title) = document.title {
            feed.title = title;
        }
    }

    for item in document.items {
        upsert_episode(library, feed_id, item);
    }
}

fn upsert_episode(library: &mut Library, feed_id: FeedId, item: ParsedItem) {
    let duration_ms = item
        .duration_raw
        .as_deref()
        .and_then(parse_duration_ms)
        .unwrap_or(0);

    // Identity is (FeedId, AudioUrl), case-insensitive on URL (§4.6, §9
    // resolved Open Question: RssGuid is stored but not consulted here).
    let existing = library.episodes.iter_mut().find(|e| {
        e.feed_id == feed_id && e.audio_url.eq_ignore_ascii_case(&item.audio_url)
    });

    match existing {
        None => {
            let mut episode = Episode::new(feed_id, item.audio_url);
            episode.rss_guid = item.rss_guid;
            episode.title = item.title;
            episode.pub_date = item.pub_date;
            episode.duration_ms = duration_ms;
            episode.description = item.description;
            library.episodes.push(episode);
        }
        Some(episode) => {
            // Soft-merge: fill only missing fields, never overwrite
            // user-visible or progress/saved/played state.
            if episode.title.is_empty() {
                episode.title = item.title;
            }
            if episode.pub_date.is_none() {
                episode.pub_date = item.pub_date;
            }
            if episode.description.is_empty() {
                episode.description = item.description;
            }
            if episode.duration_ms == 0 {
                episode.duration_ms = duration_ms;
            }
            if episode.rss_guid.is_none() {
                episode.rss_guid = item.rss_guid;
            }
        }
    }
}

/// Parses plain seconds, `MM:SS`, `HH:MM:SS`, and ISO 8601 `PT…` duration
/// forms into milliseconds (§4.6 Duration parsing).
pub fn parse_duration_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(rest) = raw.strip_prefix("PT").or_else(|| raw.strip_prefix("pt")) {
        return parse_iso8601_duration_ms(rest);
    }

    if raw.contains(':') {
        let parts: Vec<&str> = raw.split(':').collect();
        let secs: f64 = match parts.len() {
            2 => {
                let m: f64 = parts[0].parse().ok()?;
                let s: f64 = parts[1].parse().ok()?;
                m * 60.0 + s
            }
            3 => {
                let h: f64 = parts[0].parse().ok()?;
                let m: f64 = parts[1].parse().ok()?;
                let s: f64 = parts[2].parse().ok()?;
                h * 3600.0 + m * 60.0 + s
            }
            _ => return None,
        };
        return Some((secs * 1000.0).round() as i64);
    }

    raw.parse::<f64>().ok().map(|s| (s * 1000.0).round() as i64)
}

fn parse_iso8601_duration_ms(rest: &str) -> Option<i64> {
    let mut total_secs = 0.0f64;
    let mut number = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        match c.to_ascii_uppercase() {
            'H' => total_secs += value * 3600.0,
            'M' => total_secs += value * 60.0,
            'S' => total_secs += value,
            _ => return None,
        }
    }
    Some((total_secs * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_duration_ms("125"), Some(125_000));
    }

    #[test]
    fn parses_mm_ss() {
        assert_eq!(parse_duration_ms("02:05"), Some(125_000));
    }

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(parse_duration_ms("01:02:05"), Some(3_725_000));
    }

    #[test]
    fn parses_iso8601() {
        assert_eq!(parse_duration_ms("PT1H2M5S"), Some(3_725_000));
        assert_eq!(parse_duration_ms("PT45S"), Some(45_000));
    }

    #[test]
    fn add_feed_is_idempotent_by_canonical_url() {
        let mut library = Library::default();
        let id1 = add_feed(&mut library, "https://Example.com/feed.xml#x");
        let id2 = add_feed(&mut library, "https://example.com/feed.xml");
        assert_eq!(id1, id2);
        assert_eq!(library.feeds.len(), 1);
    }

    #[test]
    fn soft_merge_never_overwrites_saved_or_progress() {
        let mut library = Library::default();
        let feed_id = add_feed(&mut library, "https://example.com/feed.xml");
        let item = ParsedItem {
            audio_url: "https://example.com/ep1.mp3".into(),
            rss_guid: Some("guid-1".into()),
            title: "Episode One".into(),
            pub_date: None,
            duration_raw: Some("600".into()),
            description: "desc".into(),
        };
        upsert_episode(&mut library, feed_id, item.clone());
        let episode = library.episodes.first_mut().unwrap();
        episode.saved = true;
        episode.progress.last_pos_ms = 12_345;

        let mut updated = item;
        updated.title = "Changed Title".into();
        upsert_episode(&mut library, feed_id, updated);

        let episode = &library.episodes[0];
        assert_eq!(episode.title, "Episode One");
        assert!(episode.saved);
        assert_eq!(episode.progress.last_pos_ms, 12_345);
    }
}
