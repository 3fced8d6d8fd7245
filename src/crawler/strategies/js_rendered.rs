//! List pages that only render in a browser

use super::static_html::StaticHtmlCrawler;
use super::PageLoader;
use crate::config::SourceConfig;
use crate::crawler::{CrawlContext, CrawledItem, Crawler};
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;

/// Same extraction as [`StaticHtmlCrawler`], with pages loaded through the
/// browser pool
pub struct JsRenderedCrawler {
    inner: StaticHtmlCrawler,
}

impl JsRenderedCrawler {
    pub fn new(source: &SourceConfig, ctx: &CrawlContext) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: StaticHtmlCrawler::with_loader(source, PageLoader::browser(source, ctx))?,
        })
    }
}

#[async_trait]
impl Crawler for JsRenderedCrawler {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
        self.inner.fetch_and_parse().await
    }
}
