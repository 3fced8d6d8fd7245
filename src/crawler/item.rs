use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One ingested unit of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledItem {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub content_html: Option<String>,
    pub content_hash: Option<String>,
    pub source_id: String,
    pub dimension: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Strategy-specific fields
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl CrawledItem {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source_id: impl Into<String>,
        dimension: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            published_at: None,
            author: None,
            content: None,
            content_html: None,
            content_hash: None,
            source_id: source_id.into(),
            dimension: dimension.into(),
            tags: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author.filter(|a| !a.trim().is_empty());
        self
    }

    /// Sets the plain content and its hash
    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content_hash = content.as_deref().map(crate::dedup::content_hash);
        self.content = content;
        self
    }

    pub fn with_content_html(mut self, html: Option<String>) -> Self {
        self.content_html = html;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Terminal outcome of one crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Success,
    Partial,
    Failed,
    NoNewContent,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::NoNewContent => "no_new_content",
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one crawl of one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub source_id: String,
    pub status: CrawlStatus,
    pub items: Vec<CrawledItem>,
    pub items_total: usize,
    pub items_new: usize,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl CrawlResult {
    pub fn is_failed(&self) -> bool {
        self.status == CrawlStatus::Failed
    }
}
