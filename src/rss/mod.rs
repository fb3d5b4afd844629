//! RSS/Atom feed fetching and parsing with junk filtering.
//!
//! Parse-error policy: a malformed item is skipped with a debug log; a
//! malformed feed (unrecognised root, XML error) yields an empty result.
//! Nothing here surfaces an error to the job layer.

pub mod junk_filter;

pub use junk_filter::passes_junk_filter;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::fetch::{FetchMode, Fetcher};
use crate::models::ParsedItem;

#[derive(Debug, Default)]
pub struct FeedResult {
    pub items: Vec<ParsedItem>,
    pub feed_url: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub total_items: usize,
    pub junk_filtered: usize,
}

/// Client for fetching and parsing feeds through the shared fetcher.
#[derive(Clone)]
pub struct RssClient {
    fetcher: Fetcher,
}

impl RssClient {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Fetch a feed in `auto` mode (bypass first, direct fallback) and parse.
    pub async fn fetch_feed(&self, url: &str) -> FeedResult {
        info!("Fetching RSS feed: {}", url);
        let bytes = match self.fetcher.fetch(url, FetchMode::Auto).await {
            Ok(b) => b,
            Err(e) => {
                warn!("❌ Failed to fetch feed {}: {}", url, e);
                return FeedResult {
                    feed_url: url.to_string(),
                    ..Default::default()
                };
            }
        };
        let result = parse_feed(&bytes, url);
        info!(
            "✅ Parsed {} items from feed (filtered {} junk): {}",
            result.items.len(),
            result.junk_filtered,
            url
        );
        result
    }
}

#[derive(Debug, Default)]
struct RawItem {
    title: String,
    link: String,
    description: String,
    content_encoded: String,
    pub_date: String,
    tickers: Vec<String>,
    categories: Vec<String>,
}

/// Parse RSS 2.0 or Atom bytes. Feed kind is detected from the root element.
pub fn parse_feed(bytes: &[u8], feed_url: &str) -> FeedResult {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut result = FeedResult {
        feed_url: feed_url.to_string(),
        ..Default::default()
    };

    // Root detection decides the dialect; anything else is a malformed feed.
    let mut is_atom = false;
    let mut root_seen = false;

    let mut in_item = false;
    let mut item = RawItem::default();
    // Path of open element local names below the item/entry level
    let mut field: Option<String> = None;
    let mut field_buf = String::new();
    let mut channel_field: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if !root_seen {
                    root_seen = true;
                    match name.as_str() {
                        "rss" => is_atom = false,
                        "feed" => is_atom = true,
                        other => {
                            warn!("Unknown feed format for {}: root <{}>", feed_url, other);
                            return result;
                        }
                    }
                    continue;
                }

                let item_tag = if is_atom { "entry" } else { "item" };
                if name == item_tag {
                    in_item = true;
                    item = RawItem::default();
                    result.total_items += 1;
                    continue;
                }

                if in_item {
                    if is_atom && name == "link" {
                        // Atom links carry their target in attributes
                        if let Some(href) = atom_link_href(&e) {
                            item.link = href;
                        }
                        field = None;
                    } else if is_atom && name == "category" {
                        if let Some(term) = attr_value(&e, "term") {
                            item.categories.push(term);
                        }
                        field = None;
                    } else {
                        field = Some(full_name(e.name().as_ref()));
                        field_buf.clear();
                    }
                } else {
                    channel_field = Some(name);
                    field_buf.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                if in_item && is_atom && name == "link" {
                    if let Some(href) = atom_link_href(&e) {
                        item.link = href;
                    }
                } else if in_item && is_atom && name == "category" {
                    if let Some(term) = attr_value(&e, "term") {
                        item.categories.push(term);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Ok(txt) = t.unescape() {
                    field_buf.push_str(&txt);
                }
            }
            Ok(Event::CData(t)) => {
                field_buf.push_str(&String::from_utf8_lossy(&t));
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                let item_tag = if is_atom { "entry" } else { "item" };

                if name == item_tag && in_item {
                    in_item = false;
                    match finalize_item(&item, feed_url, is_atom) {
                        Some(parsed) => result.items.push(parsed),
                        None => {
                            debug!("Filtered out junk article: {}...", truncate(&item.title, 50));
                            result.junk_filtered += 1;
                        }
                    }
                    continue;
                }

                if in_item {
                    if let Some(f) = field.take() {
                        assign_field(&mut item, &f, field_buf.trim(), is_atom);
                        field_buf.clear();
                    }
                } else if let Some(f) = channel_field.take() {
                    let value = field_buf.trim().to_string();
                    if !value.is_empty() {
                        match f.as_str() {
                            "title" if result.title.is_none() => result.title = Some(value),
                            "link" if result.link.is_none() => result.link = Some(value),
                            _ => {}
                        }
                    }
                    field_buf.clear();
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("❌ XML parse error for {}: {}", feed_url, e);
                return FeedResult {
                    feed_url: feed_url.to_string(),
                    ..Default::default()
                };
            }
        }
    }

    result
}

fn assign_field(item: &mut RawItem, field: &str, value: &str, is_atom: bool) {
    if value.is_empty() {
        return;
    }
    match field {
        "title" => item.title = value.to_string(),
        "link" if !is_atom => item.link = value.to_string(),
        "description" | "summary" => item.description = value.to_string(),
        // WordPress-style feeds carry the full article here
        "content:encoded" | "content" => item.content_encoded = value.to_string(),
        "pubDate" | "published" => item.pub_date = value.to_string(),
        // Entries may carry only <updated>; use it when nothing better exists
        "updated" if item.pub_date.is_empty() => item.pub_date = value.to_string(),
        "category" => item.categories.push(value.to_string()),
        // StockTwits-style ticker tags
        "symbol" => item.tickers.push(value.to_uppercase()),
        _ => {}
    }
}

fn finalize_item(item: &RawItem, feed_url: &str, is_atom: bool) -> Option<ParsedItem> {
    let content = if !item.content_encoded.is_empty() {
        item.content_encoded.clone()
    } else {
        item.description.clone()
    };

    if !passes_junk_filter(&item.title, &content, &item.categories) {
        return None;
    }

    let published_at = if item.pub_date.is_empty() {
        None
    } else if is_atom {
        parse_iso_date(&item.pub_date)
    } else {
        parse_rfc822_date(&item.pub_date)
    };

    let link = if item.link.is_empty() {
        feed_url.to_string()
    } else {
        item.link.clone()
    };

    Some(ParsedItem {
        title: item.title.clone(),
        url: link.clone(),
        content: strip_html(&content),
        description: strip_html(&item.description),
        published_at,
        source: extract_source_from_url(&link),
        tickers: if item.tickers.is_empty() {
            None
        } else {
            Some(item.tickers.clone())
        },
        categories: if item.categories.is_empty() {
            None
        } else {
            Some(item.categories.clone())
        },
    })
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

fn full_name(qname: &[u8]) -> String {
    String::from_utf8_lossy(qname).to_string()
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key.as_bytes() {
            a.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

/// Atom `<link>`: prefer rel="alternate" or an unqualified rel.
fn atom_link_href(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    let rel = attr_value(e, "rel");
    match rel.as_deref() {
        None | Some("alternate") => attr_value(e, "href"),
        _ => None,
    }
}

/// Parse RFC 822 dates as used by RSS `pubDate`.
pub fn parse_rfc822_date(date_str: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc2822(date_str) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            debug!("Error parsing RFC 822 date '{}': {}", date_str, e);
            None
        }
    }
}

/// Format a timestamp back to RFC 822 for feed-facing output.
pub fn format_rfc822_date(t: DateTime<Utc>) -> String {
    t.to_rfc2822()
}

/// Parse ISO 8601 / RFC 3339 dates as used by Atom.
pub fn parse_iso_date(date_str: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(date_str) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            debug!("Error parsing ISO date '{}': {}", date_str, e);
            None
        }
    }
}

pub fn strip_html(text: &str) -> String {
    static TAG_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| regex::Regex::new(r"<[^>]+>").unwrap());
    re.replace_all(text, "").trim().to_string()
}

pub fn extract_source_from_url(u: &str) -> String {
    url::Url::parse(u)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.to_string()))
        .map(|h| h.strip_prefix("www.").map(|s| s.to_string()).unwrap_or(h))
        .unwrap_or_else(|| "unknown".to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Market Wire</title>
    <link>https://www.marketwire.example</link>
    <item>
      <title>Apple reports Q3 earnings beat</title>
      <link>https://www.marketwire.example/apple-q3</link>
      <description>Short teaser.</description>
      <content:encoded><![CDATA[<p>Revenue grew 12% and EPS beat analyst estimates, sending shares higher in after-hours trading on the Nasdaq exchange.</p>]]></content:encoded>
      <pubDate>Thu, 05 Jun 2025 14:30:00 +0000</pubDate>
      <symbol>aapl</symbol>
      <category>Earnings</category>
    </item>
    <item>
      <title>Sign up now for hot stock tips</title>
      <link>https://spam.example/ad</link>
      <description>Click here, buy now, limited time offer! Do not miss out on this once in a lifetime chance to get rich quickly.</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Finance Blog</title>
  <entry>
    <title>Fed holds rates steady</title>
    <link rel="alternate" href="https://blog.example/fed-rates"/>
    <summary>The central bank kept its target range unchanged as markets expected, citing steady earnings growth and a resilient labor picture across most sectors.</summary>
    <published>2025-06-05T10:00:00Z</published>
    <category term="macro"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_feed_filters_junk() {
        let result = parse_feed(RSS_FEED.as_bytes(), "https://marketwire.example/feed");
        assert_eq!(result.total_items, 2);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.junk_filtered, 1);

        let item = &result.items[0];
        assert_eq!(item.title, "Apple reports Q3 earnings beat");
        assert_eq!(item.url, "https://www.marketwire.example/apple-q3");
        // content:encoded preferred over description, HTML stripped
        assert!(item.content.starts_with("Revenue grew 12%"));
        assert!(!item.content.contains("<p>"));
        assert_eq!(item.source, "marketwire.example");
        assert_eq!(item.tickers.as_deref(), Some(&["AAPL".to_string()][..]));
        assert_eq!(
            item.categories.as_deref(),
            Some(&["Earnings".to_string()][..])
        );
        assert!(item.published_at.is_some());
    }

    #[test]
    fn test_parse_atom_feed() {
        let result = parse_feed(ATOM_FEED.as_bytes(), "https://blog.example/atom");
        assert_eq!(result.items.len(), 1);
        let item = &result.items[0];
        assert_eq!(item.title, "Fed holds rates steady");
        assert_eq!(item.url, "https://blog.example/fed-rates");
        assert_eq!(
            item.categories.as_deref(),
            Some(&["macro".to_string()][..])
        );
        assert_eq!(
            item.published_at.unwrap().to_rfc3339(),
            "2025-06-05T10:00:00+00:00"
        );
    }

    #[test]
    fn test_empty_feed_yields_empty_list() {
        let feed = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let result = parse_feed(feed.as_bytes(), "https://empty.example/feed");
        assert!(result.items.is_empty());
        assert_eq!(result.total_items, 0);
    }

    #[test]
    fn test_malformed_feed_yields_empty_list() {
        let result = parse_feed(b"<html>not a feed</html>", "https://bad.example");
        assert!(result.items.is_empty());

        let result = parse_feed(b"\x00\x01garbage", "https://worse.example");
        assert!(result.items.is_empty());
    }

    #[test]
    fn test_rfc822_round_trip() {
        let original = "Thu, 05 Jun 2025 14:30:00 +0000";
        let parsed = parse_rfc822_date(original).unwrap();
        let reparsed = parse_rfc822_date(&format_rfc822_date(parsed)).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("no tags"), "no tags");
    }

    #[test]
    fn test_extract_source() {
        assert_eq!(
            extract_source_from_url("https://www.example.com:8080/a/b"),
            "example.com"
        );
        assert_eq!(extract_source_from_url("not a url"), "unknown");
    }
}
