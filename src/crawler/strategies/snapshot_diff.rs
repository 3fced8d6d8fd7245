//! Change detection on pages without a list structure

use super::html::{optional_selector, page_text};
use super::PageLoader;
use crate::config::SourceConfig;
use crate::crawler::{CrawlContext, CrawledItem, Crawler};
use crate::dedup::content_hash;
use crate::state::{CrawlStateStore, SnapshotObservation};
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;
use chrono::Utc;
use scraper::Selector;
use std::collections::HashSet;
use std::sync::Arc;

/// Hashes the visible text of a page and emits one synthetic item when it
/// differs from the previous observation
///
/// The first observation of a page only records a baseline.
pub struct SnapshotDiffCrawler {
    source: SourceConfig,
    loader: PageLoader,
    state: Arc<CrawlStateStore>,
    content: Option<Selector>,
}

/// Lines present in `current` but not in `previous`, and the reverse
pub fn line_diff(previous: &str, current: &str) -> (Vec<String>, Vec<String>) {
    let before: HashSet<&str> = previous.lines().collect();
    let after: HashSet<&str> = current.lines().collect();

    let added = current
        .lines()
        .filter(|line| !before.contains(line))
        .map(str::to_string)
        .collect();
    let removed = previous
        .lines()
        .filter(|line| !after.contains(line))
        .map(str::to_string)
        .collect();
    (added, removed)
}

impl SnapshotDiffCrawler {
    pub fn new(source: &SourceConfig, ctx: &CrawlContext) -> Result<Self, ConfigError> {
        Ok(Self {
            source: source.clone(),
            loader: PageLoader::for_source(source, ctx),
            state: Arc::clone(&ctx.state),
            content: optional_selector(source, "content_selector")?,
        })
    }
}

#[async_trait]
impl Crawler for SnapshotDiffCrawler {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
        let html = self.loader.load(&self.source.url).await?;
        let text = page_text(&html, self.content.as_ref());
        if text.is_empty() {
            return Err(CrawlError::Parse(format!(
                "no text found at {}",
                self.source.url
            )));
        }

        let hash = content_hash(&text);
        let observed_at = Utc::now();
        let previous = self.state.observation(&self.source.id)?;

        let observation = SnapshotObservation {
            content_hash: hash.clone(),
            text: text.clone(),
            observed_at,
        };

        let Some(previous) = previous else {
            tracing::info!(source_id = %self.source.id, "Recorded baseline snapshot");
            self.state.put_observation(&self.source.id, &observation)?;
            return Ok(Vec::new());
        };

        if previous.content_hash == hash {
            return Ok(Vec::new());
        }

        let (added, removed) = line_diff(&previous.text, &text);
        self.state.put_observation(&self.source.id, &observation)?;

        let content = if added.is_empty() {
            format!("Removed:\n{}", removed.join("\n"))
        } else {
            added.join("\n")
        };

        let item = CrawledItem::new(
            format!("{} updated", self.source.name),
            format!("{}#change-{}", self.source.url, &hash[..12]),
            &self.source.id,
            &self.source.dimension,
        )
        .with_published_at(Some(observed_at))
        .with_content(Some(content))
        .with_tags(vec!["change".to_string()])
        .with_extra("previous_hash", previous.content_hash)
        .with_extra("current_hash", hash)
        .with_extra("previous_observed_at", previous.observed_at.to_rfc3339())
        .with_extra("added_lines", added.len())
        .with_extra("removed_lines", removed);

        Ok(vec![item])
    }
}
