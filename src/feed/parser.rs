//! Feed document parsing.
//!
//! Converts RSS, Atom and JSON Feed documents into [`FetchedFeed`] using
//! feed-rs.

use feed_rs::model::{Entry, Link};
use feed_rs::parser;

use super::types::{FetchedFeed, Item};
use crate::{FeedmailError, Result};

/// Parse a feed document.
pub fn parse_feed(bytes: &[u8]) -> Result<FetchedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| FeedmailError::Feed(format!("failed to parse feed: {e}")))?;

    let feed_link = feed
        .links
        .iter()
        .find(|l| is_rel(l, "self"))
        .map(|l| l.href.clone());
    let link = alternate_link(&feed.links);
    let links = feed.links.iter().map(|l| l.href.clone()).collect();

    let items = feed.entries.into_iter().map(convert_entry).collect();

    Ok(FetchedFeed {
        title: feed.title.map(|t| t.content),
        link,
        feed_link,
        links,
        description: feed.description.map(|d| d.content),
        items,
    })
}

fn convert_entry(entry: Entry) -> Item {
    // feed-rs synthesizes an id when the document has none
    let guid = Some(entry.id).filter(|id| !id.is_empty());

    Item {
        title: entry.title.map(|t| t.content),
        link: alternate_link(&entry.links),
        guid,
        description: entry.summary.map(|s| s.content),
        content: entry.content.and_then(|c| c.body),
        author: entry.authors.first().map(|a| a.name.clone()),
        published: entry.published.or(entry.updated),
    }
}

fn is_rel(link: &Link, rel: &str) -> bool {
    link.rel.as_deref() == Some(rel)
}

/// The link pointing at the human-readable page: the first `alternate` (or
/// untyped) link, else the first non-`self` link.
fn alternate_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.is_none() || is_rel(l, "alternate"))
        .or_else(|| links.iter().find(|l| !is_rel(l, "self")))
        .map(|l| l.href.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example News</title>
    <link>https://example.com/</link>
    <atom:link href="https://example.com/rss.xml" rel="self" type="application/rss+xml"/>
    <description>News from example.com</description>
    <item>
      <title>First</title>
      <link>https://example.com/1</link>
      <guid>item-1</guid>
      <description>Plain summary</description>
      <pubDate>Tue, 02 Jan 2024 03:04:05 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <guid>item-2</guid>
      <description><![CDATA[<p>Rich <b>summary</b></p>]]></description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <link href="https://atom.example/" rel="alternate"/>
  <link href="https://atom.example/feed.atom" rel="self"/>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <link href="https://atom.example/entry"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-01-03T10:00:00Z</updated>
    <author><name>Alice</name></author>
    <summary>Short</summary>
    <content type="html">&lt;p&gt;Long body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Example News"));
        assert_eq!(feed.link.as_deref(), Some("https://example.com/"));
        assert_eq!(feed.feed_link.as_deref(), Some("https://example.com/rss.xml"));
        assert_eq!(feed.description.as_deref(), Some("News from example.com"));
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title.as_deref(), Some("First"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.guid.as_deref(), Some("item-1"));
        assert_eq!(first.description.as_deref(), Some("Plain summary"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );

        assert_eq!(feed.items[1].guid.as_deref(), Some("item-2"));
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Atom Example"));
        assert_eq!(feed.link.as_deref(), Some("https://atom.example/"));
        assert_eq!(feed.feed_link.as_deref(), Some("https://atom.example/feed.atom"));
        assert_eq!(feed.links.len(), 2);

        let entry = &feed.items[0];
        assert_eq!(entry.link.as_deref(), Some("https://atom.example/entry"));
        assert_eq!(entry.author.as_deref(), Some("Alice"));
        assert_eq!(entry.description.as_deref(), Some("Short"));
        assert!(entry.content.as_deref().unwrap_or_default().contains("Long body"));
        // No <published>, falls back to <updated>
        assert_eq!(
            entry.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_empty_channel() {
        let xml = r#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert!(feed.items.is_empty());
        assert!(feed.feed_link.is_none());
    }

    #[test]
    fn test_parse_invalid() {
        let result = parse_feed(b"definitely not a feed");
        assert!(matches!(result, Err(FeedmailError::Feed(_))));
    }
}
