use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A content item as produced by a source adapter, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewContentItem {
    pub source_id: String,
    pub external_id: Option<String>,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewContentItem {
    /// Identity of the item within its source. An explicit external id wins;
    /// otherwise the normalized title and canonical link are combined.
    pub fn natural_key(&self) -> String {
        match self.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => format!("id:{}", id),
            _ => format!(
                "{}|{}",
                self.title.trim().to_lowercase(),
                canonical_link(&self.link)
            ),
        }
    }

    /// Title and link are the only fields an item cannot do without.
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty() && !self.link.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: i64,
    pub campaign_id: Option<i64>,
    pub source_id: String,
    pub natural_key: String,
    pub external_id: Option<String>,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl ContentItem {
    /// Best available text for prompts: body, then description, then title.
    pub fn text(&self) -> &str {
        self.body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .or(self.description.as_deref().filter(|d| !d.trim().is_empty()))
            .unwrap_or(&self.title)
    }
}

/// Lower-cases scheme and host, drops the fragment and any trailing slash so
/// that trivially different spellings of one URL share a key.
pub fn canonical_link(link: &str) -> String {
    let trimmed = link.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let mut s = url.to_string();
            while s.ends_with('/') {
                s.pop();
            }
            s
        }
        Err(_) => trimmed.trim_end_matches('/').to_lowercase(),
    }
}
