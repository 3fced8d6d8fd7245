//! Crawling: fetching, browser pages, strategies and the run wrapper
//!
//! This module contains:
//! - the item and result model shared by every strategy
//! - a paced, retrying HTTP client
//! - a bounded pool of headless-browser pages
//! - the [`Crawler`] trait and its built-in strategies
//! - the factory that resolves and runs strategies, and the coalescing runner

mod browser;
mod factory;
mod fetcher;
mod item;
mod runner;
pub mod strategies;

pub use browser::{panic_message, BrowserBackend, BrowserPage, BrowserPool, ChromeBackend};
pub use factory::{constructor, CrawlerConstructor, CrawlerFactory};
pub use fetcher::{host_key, BackoffPolicy, FetchClient, FetchOptions};
pub use item::{CrawlResult, CrawlStatus, CrawledItem};
pub use runner::{RunOutcome, SourceRunner};


use crate::config::{FetchConfig, SourceConfig};
use crate::state::CrawlStateStore;
use crate::CrawlError;
use async_trait::async_trait;
use std::sync::Arc;

/// A crawl strategy for one source
///
/// Implementations only fetch and parse. Timing, status classification and
/// error capture happen in [`CrawlerFactory::run`].
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError>;
}

/// Shared resources handed to strategy constructors
#[derive(Clone)]
pub struct CrawlContext {
    pub fetch: Arc<FetchClient>,
    pub browser: Arc<BrowserPool>,
    pub fetch_config: FetchConfig,
    pub state: Arc<CrawlStateStore>,
}

impl CrawlContext {
    /// Request options for a source, with its overrides applied
    pub fn fetch_options(&self, source: &SourceConfig) -> FetchOptions {
        FetchOptions::for_source(&self.fetch_config, source)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{BrowserConfig, SchedulePreset};
    use crate::storage::JsonFileStore;
    pub(crate) use super::browser::tests::FakeBackend;
    use serde_json::Map;
    use std::path::Path;
    use std::time::Duration;

    /// Context backed by a fake browser and a JSON store under `dir`
    pub(crate) fn context(dir: &Path) -> CrawlContext {
        let fetch_config = FetchConfig::default();
        CrawlContext {
            fetch: Arc::new(FetchClient::new(&fetch_config).unwrap()),
            browser: Arc::new(BrowserPool::new(
                Arc::new(FakeBackend::new("<p></p>")),
                BrowserConfig::default().max_pages,
                Duration::from_secs(1),
                Duration::from_secs(1),
            )),
            fetch_config,
            state: Arc::new(CrawlStateStore::new(Arc::new(
                JsonFileStore::open(dir.join("state")).unwrap(),
            ))),
        }
    }

    pub(crate) fn source(id: &str, method: Option<&str>, class: Option<&str>) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: id.to_string(),
            url: "https://example.com/news".to_string(),
            dimension: "tech".to_string(),
            group: None,
            crawl_method: method.map(str::to_string),
            crawler_class: class.map(str::to_string),
            schedule: SchedulePreset::Daily,
            is_enabled: true,
            priority: 2,
            options: Map::new(),
        }
    }
}
