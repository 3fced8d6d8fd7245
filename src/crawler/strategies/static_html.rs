//! Server-rendered list pages

use super::html::{extract_block, extract_list, optional_selector, ListSelectors};
use super::PageLoader;
use crate::config::SourceConfig;
use crate::crawler::{CrawlContext, CrawledItem, Crawler};
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;
use scraper::Selector;
use url::Url;

const DEFAULT_MAX_DETAIL_PAGES: usize = 20;

/// Extracts entries from a list page, optionally following each to its
/// detail page when `detail_selector` is set
pub struct StaticHtmlCrawler {
    source: SourceConfig,
    base_url: Url,
    loader: PageLoader,
    selectors: ListSelectors,
    detail: Option<Selector>,
    max_items: Option<usize>,
    max_detail_pages: usize,
}

impl StaticHtmlCrawler {
    pub fn new(source: &SourceConfig, ctx: &CrawlContext) -> Result<Self, ConfigError> {
        Self::with_loader(source, PageLoader::http(source, ctx))
    }

    pub(crate) fn with_loader(source: &SourceConfig, loader: PageLoader) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&source.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", source.url, e)))?;
        Ok(Self {
            source: source.clone(),
            base_url,
            loader,
            selectors: ListSelectors::from_source(source)?,
            detail: optional_selector(source, "detail_selector")?,
            max_items: source.option_u64("max_items").map(|n| n as usize),
            max_detail_pages: source
                .option_u64("max_detail_pages")
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_MAX_DETAIL_PAGES),
        })
    }

    async fn fill_detail(&self, item: CrawledItem, selector: &Selector) -> CrawledItem {
        match self.loader.load(&item.url).await {
            Ok(html) => match extract_block(&html, selector) {
                Some((text, inner_html)) => item.with_content(Some(text)).with_content_html(Some(inner_html)),
                None => {
                    tracing::debug!("No detail content at {}", item.url);
                    item
                }
            },
            Err(e) => {
                tracing::warn!(
                    source_id = %self.source.id,
                    "Detail page {} failed: {}",
                    item.url,
                    e
                );
                item
            }
        }
    }
}

#[async_trait]
impl Crawler for StaticHtmlCrawler {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
        let html = self.loader.load(&self.source.url).await?;
        let entries = extract_list(&html, &self.base_url, &self.selectors);
        tracing::debug!(
            source_id = %self.source.id,
            "List page yielded {} entries",
            entries.len()
        );

        let limit = self.max_items.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        for (index, entry) in entries.into_iter().take(limit).enumerate() {
            let item = CrawledItem::new(entry.title, entry.url, &self.source.id, &self.source.dimension)
                .with_published_at(entry.published_at)
                .with_author(entry.author)
                .with_content(entry.summary);

            let item = match &self.detail {
                Some(selector) if index < self.max_detail_pages => {
                    self.fill_detail(item, selector).await
                }
                _ => item,
            };
            items.push(item);
        }

        Ok(items)
    }
}
