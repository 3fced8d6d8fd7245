//! RSS 2.0 and Atom feeds

use super::html::html_to_text;
use crate::config::SourceConfig;
use crate::crawler::{CrawlContext, CrawledItem, Crawler, FetchClient, FetchOptions};
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date")]
    dc_date: Option<String>,
    author: Option<String>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    id: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    author: Option<AtomAuthor>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: String,
}

/// Feed entry in a format-neutral shape
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub content_html: Option<String>,
    pub tags: Vec<String>,
}

/// Parses an RSS 2.0 or Atom document
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, CrawlError> {
    let head: String = xml.chars().take(1024).collect();
    if head.contains("<feed") {
        parse_atom(xml)
    } else {
        parse_rss(xml)
    }
}

fn parse_rss(xml: &str) -> Result<Vec<FeedEntry>, CrawlError> {
    let document: RssDocument = quick_xml::de::from_str(xml)
        .map_err(|e| CrawlError::Parse(format!("invalid RSS document: {}", e)))?;

    Ok(document
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let url = item
                .link
                .or_else(|| item.guid.filter(|g| g.starts_with("http")))?
                .trim()
                .to_string();
            let published_at = item
                .pub_date
                .or(item.dc_date)
                .as_deref()
                .and_then(parse_feed_date);
            Some(FeedEntry {
                title: item.title.map(|t| html_to_text(&t)).unwrap_or_default(),
                url,
                published_at,
                author: item.creator.or(item.author),
                content_html: item.content_encoded.or(item.description),
                tags: item.categories,
            })
        })
        .collect())
}

fn parse_atom(xml: &str) -> Result<Vec<FeedEntry>, CrawlError> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)
        .map_err(|e| CrawlError::Parse(format!("invalid Atom document: {}", e)))?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.trim().to_string())
                .or_else(|| entry.id.filter(|id| id.starts_with("http")))?;
            let published_at = entry
                .published
                .or(entry.updated)
                .as_deref()
                .and_then(parse_feed_date);
            Some(FeedEntry {
                title: entry.title.map(|t| html_to_text(&t.value)).unwrap_or_default(),
                url,
                published_at,
                author: entry.author.and_then(|a| a.name),
                content_html: entry.content.or(entry.summary).map(|t| t.value),
                tags: entry.categories.into_iter().map(|c| c.term).collect(),
            })
        })
        .collect())
}

fn parse_feed_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| super::html::parse_date(text, None))
}

/// Crawls a feed URL
pub struct RssCrawler {
    source: SourceConfig,
    fetch: Arc<FetchClient>,
    options: FetchOptions,
    max_items: Option<usize>,
}

impl RssCrawler {
    pub fn new(source: &SourceConfig, ctx: &CrawlContext) -> Result<Self, ConfigError> {
        Ok(Self {
            source: source.clone(),
            fetch: Arc::clone(&ctx.fetch),
            options: ctx.fetch_options(source),
            max_items: source.option_u64("max_items").map(|n| n as usize),
        })
    }
}

#[async_trait]
impl Crawler for RssCrawler {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
        let xml = self.fetch.fetch_text(&self.source.url, &self.options).await?;
        let entries = parse_feed(&xml)?;

        let limit = self.max_items.unwrap_or(usize::MAX);
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|entry| {
                let text = entry.content_html.as_deref().map(html_to_text);
                CrawledItem::new(entry.title, entry.url, &self.source.id, &self.source.dimension)
                    .with_published_at(entry.published_at)
                    .with_author(entry.author)
                    .with_content(text.filter(|t| !t.is_empty()))
                    .with_content_html(entry.content_html)
                    .with_tags(entry.tags)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Ministry news</title>
    <link>https://example.gov/</link>
    <item>
      <title>New &amp; improved policy</title>
      <link>https://example.gov/news/1</link>
      <pubDate>Fri, 01 Mar 2024 10:00:00 +0800</pubDate>
      <dc:creator>Press Office</dc:creator>
      <description><![CDATA[<p>Policy <b>text</b></p>]]></description>
      <category>policy</category>
      <category>economy</category>
    </item>
    <item>
      <title>Guid only</title>
      <guid isPermaLink="true">https://example.gov/news/2</guid>
    </item>
    <item>
      <title>No link</title>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Lab blog</title>
  <entry>
    <title>Release notes</title>
    <link rel="alternate" href="https://lab.example.com/posts/release"/>
    <link rel="edit" href="https://lab.example.com/edit/1"/>
    <id>tag:lab.example.com,2024:1</id>
    <updated>2024-03-02T09:00:00Z</updated>
    <author><name>Dana</name></author>
    <summary>Short summary</summary>
    <category term="ml"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title, "New & improved policy");
        assert_eq!(first.url, "https://example.gov/news/1");
        assert_eq!(first.author.as_deref(), Some("Press Office"));
        assert!(first.published_at.is_some());
        assert_eq!(first.tags, vec!["policy", "economy"]);
        assert!(first.content_html.as_deref().unwrap().contains("<b>text</b>"));

        assert_eq!(entries[1].url, "https://example.gov/news/2");
    }

    #[test]
    fn test_parse_atom() {
        let entries = parse_feed(ATOM).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.url, "https://lab.example.com/posts/release");
        assert_eq!(entry.author.as_deref(), Some("Dana"));
        assert_eq!(entry.content_html.as_deref(), Some("Short summary"));
        assert_eq!(entry.tags, vec!["ml"]);
        assert!(entry.published_at.is_some());
    }

    #[test]
    fn test_invalid_feed() {
        assert!(matches!(
            parse_feed("<html><body>not a feed</body></html>"),
            Err(CrawlError::Parse(_))
        ));
    }
}
