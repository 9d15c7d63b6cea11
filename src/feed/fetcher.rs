use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::Entry;
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::models::NewContentItem;

/// Anything that can produce a normalized batch for one configured source.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_batch(&self, source: &SourceConfig) -> Result<Vec<NewContentItem>>;
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newsletter-pipeline/1.0")
            .build()?;

        Ok(Self { client })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(String, String, Vec<u8>)> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch {}: HTTP {}", url, response.status()).into());
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok((final_url, content_type, bytes))
    }
}

#[async_trait]
impl ContentSource for FeedFetcher {
    /// Fetches the configured URL. A homepage is accepted too: its advertised
    /// RSS/Atom link is followed once.
    async fn fetch_batch(&self, source: &SourceConfig) -> Result<Vec<NewContentItem>> {
        let (final_url, content_type, bytes) = self.fetch_bytes(&source.url).await?;

        match parse_feed(&source.id, &bytes) {
            Ok(items) => Ok(items),
            Err(parse_error) => {
                let looks_like_html = content_type.contains("html")
                    || bytes.starts_with(b"<!")
                    || bytes.starts_with(b"<html");
                if !looks_like_html {
                    return Err(parse_error);
                }
                let html = String::from_utf8_lossy(&bytes);
                let Some(feed_url) = find_feed_link(&html, &final_url) else {
                    return Err(anyhow::anyhow!("Could not find RSS/Atom feed at {}", source.url).into());
                };
                tracing::debug!(source = %source.id, feed_url = %feed_url, "Following discovered feed link");
                let (_, _, feed_bytes) = self.fetch_bytes(&feed_url).await?;
                parse_feed(&source.id, &feed_bytes)
            }
        }
    }
}

/// Parses RSS/Atom bytes into normalized items, dropping entries without a
/// title or link.
pub fn parse_feed(source_id: &str, bytes: &[u8]) -> Result<Vec<NewContentItem>> {
    let feed = parser::parse(bytes)?;
    let total = feed.entries.len();

    let items: Vec<NewContentItem> = feed
        .entries
        .into_iter()
        .map(|entry| normalize_entry(source_id, entry))
        .filter(NewContentItem::is_usable)
        .collect();

    if items.len() < total {
        tracing::debug!(
            source = source_id,
            discarded = total - items.len(),
            "Discarded entries without title or link"
        );
    }
    Ok(items)
}

fn normalize_entry(source_id: &str, entry: Entry) -> NewContentItem {
    let description = entry
        .summary
        .as_ref()
        .map(|s| html_to_text(&s.content))
        .filter(|s| !s.is_empty());
    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .map(html_to_text)
        .filter(|s| !s.is_empty());
    let image_url = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    NewContentItem {
        source_id: source_id.to_string(),
        external_id: Some(entry.id).filter(|id| !id.trim().is_empty()),
        title: entry
            .title
            .map(|t| collapse_whitespace(&t.content))
            .unwrap_or_default(),
        link: entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default(),
        author: entry.authors.first().map(|a| a.name.clone()),
        description,
        body,
        image_url,
        published_at: entry.published.or(entry.updated),
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
        .map(|text| {
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `<link>` tag advertising an RSS or Atom feed, with its href made
/// absolute against the page URL. Attribute order does not matter.
fn find_feed_link(html: &str, page_url: &str) -> Option<String> {
    let tag_re = Regex::new(r"(?i)<link\b[^>]*>").ok()?;
    let feed_type_re = Regex::new(r#"(?i)\btype\s*=\s*["']application/(?:rss|atom)\+xml["']"#).ok()?;
    let href_re = Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']+)["']"#).ok()?;

    let link = tag_re
        .find_iter(html)
        .map(|tag| tag.as_str())
        .filter(|tag| feed_type_re.is_match(tag))
        .find_map(|tag| href_re.captures(tag))
        .and_then(|cap| cap.get(1))
        .map(|href| absolute_url(href.as_str(), page_url));
    link
}

fn absolute_url(href: &str, page_url: &str) -> String {
    url::Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>City News</title>
    <link>https://citynews.example</link>
    <description>Local</description>
    <item>
      <title>  Council   approves budget </title>
      <link>https://citynews.example/budget</link>
      <guid>budget-2026</guid>
      <description>&lt;p&gt;The council voted 7-2.&lt;/p&gt;</description>
      <pubDate>Mon, 02 Mar 2026 14:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped</description>
    </item>
    <item>
      <title>Bad date</title>
      <link>https://citynews.example/bad-date</link>
      <pubDate>sometime last week</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_normalizes_and_discards() {
        let items = parse_feed("city-news", RSS.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);

        let budget = &items[0];
        assert_eq!(budget.title, "Council approves budget");
        assert_eq!(budget.link, "https://citynews.example/budget");
        assert_eq!(budget.external_id.as_deref(), Some("budget-2026"));
        assert_eq!(budget.description.as_deref(), Some("The council voted 7-2."));
        assert!(budget.published_at.is_some());

        let bad_date = &items[1];
        assert_eq!(bad_date.title, "Bad date");
        assert!(bad_date.published_at.is_none());
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(parse_feed("x", b"not a feed").is_err());
    }

    #[test]
    fn test_find_feed_link_resolves_relative_href() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        </head></html>"#;
        assert_eq!(
            find_feed_link(html, "https://citynews.example/news/"),
            Some("https://citynews.example/feed.xml".to_string())
        );
        assert_eq!(find_feed_link("<html></html>", "https://x.org"), None);
    }

    #[test]
    fn test_find_feed_link_ignores_attribute_order_and_other_links() {
        let html = r#"<link rel="stylesheet" href="/site.css">
            <LINK href="https://feeds.example/atom" type="application/atom+xml" rel="alternate">"#;
        assert_eq!(
            find_feed_link(html, "https://citynews.example/"),
            Some("https://feeds.example/atom".to_string())
        );
    }

    #[tokio::test]
    async fn test_bad_date_falls_back_to_ingest_time() {
        use chrono::{TimeZone, Utc};

        use crate::db::Repository;
        use crate::pipeline::Gatekeeper;

        let repo = Repository::in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 6, 0, 0).unwrap();
        let items = parse_feed("city-news", RSS.as_bytes()).unwrap();

        let (report, rows) = Gatekeeper::new(&repo)
            .ingest_batch(None, "city-news", items, now)
            .await;

        assert_eq!(report.inserted, 2);
        let bad_date = rows.iter().find(|r| r.title == "Bad date").unwrap();
        assert_eq!(bad_date.published_at, now);
        assert_eq!(bad_date.ingested_at, now);
        let budget = rows.iter().find(|r| r.title == "Council approves budget").unwrap();
        assert_eq!(
            budget.published_at,
            Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
        );
    }
}
