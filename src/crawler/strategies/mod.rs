//! Built-in crawl strategies
//!
//! | key | aliases | strategy |
//! |---|---|---|
//! | `rss` | `feed`, `atom` | [`RssCrawler`] |
//! | `static_html` | `static`, `html` | [`StaticHtmlCrawler`] |
//! | `js_rendered` | `dynamic`, `browser` | [`JsRenderedCrawler`] |
//! | `snapshot_diff` | `snapshot`, `diff` | [`SnapshotDiffCrawler`] |
//! | `social` | `social_placeholder`, `twitter` | [`ApiCrawler`] (placeholder unless `api_endpoint` is set) |
//! | `json_api` | `api` | [`ApiCrawler`] |
//! | `profile_list` | `structured_profile_list`, `faculty` | [`ProfileListCrawler`] |

mod api;
pub mod html;
mod js_rendered;
mod profile_list;
mod rss;
mod snapshot_diff;
mod static_html;

pub use api::ApiCrawler;
pub use js_rendered::JsRenderedCrawler;
pub use profile_list::ProfileListCrawler;
pub use rss::{parse_feed, FeedEntry, RssCrawler};
pub use snapshot_diff::SnapshotDiffCrawler;
pub use static_html::StaticHtmlCrawler;

use crate::config::SourceConfig;
use crate::crawler::{BrowserPool, CrawlContext, FetchClient, FetchOptions};
use crate::CrawlError;
use std::sync::Arc;
use std::time::Duration;

/// How a strategy retrieves page HTML
pub(crate) enum PageLoader {
    Http {
        fetch: Arc<FetchClient>,
        options: FetchOptions,
    },
    Browser {
        pool: Arc<BrowserPool>,
        wait_selector: Option<String>,
        wait_timeout: Duration,
    },
}

impl PageLoader {
    pub(crate) fn http(source: &SourceConfig, ctx: &CrawlContext) -> Self {
        Self::Http {
            fetch: Arc::clone(&ctx.fetch),
            options: ctx.fetch_options(source),
        }
    }

    /// Browser loader; waits for `wait_selector` (option) after navigation
    pub(crate) fn browser(source: &SourceConfig, ctx: &CrawlContext) -> Self {
        Self::Browser {
            pool: Arc::clone(&ctx.browser),
            wait_selector: source
                .option_str("wait_selector")
                .or(source.option_str("item_selector"))
                .map(str::to_string),
            wait_timeout: Duration::from_secs(source.option_u64("wait_seconds").unwrap_or(15)),
        }
    }

    /// HTTP unless the source sets `uses_browser = true`
    pub(crate) fn for_source(source: &SourceConfig, ctx: &CrawlContext) -> Self {
        if source.option_bool("uses_browser").unwrap_or(false) {
            Self::browser(source, ctx)
        } else {
            Self::http(source, ctx)
        }
    }

    pub(crate) async fn load(&self, url: &str) -> Result<String, CrawlError> {
        match self {
            Self::Http { fetch, options } => Ok(fetch.fetch_text(url, options).await?),
            Self::Browser {
                pool,
                wait_selector,
                wait_timeout,
            } => {
                let url = url.to_string();
                let wait_selector = wait_selector.clone();
                let wait_timeout = *wait_timeout;
                pool.with_page(move |page| {
                    Box::pin(async move {
                        page.goto(&url).await?;
                        if let Some(selector) = wait_selector {
                            page.wait_for(&selector, wait_timeout).await?;
                        }
                        page.content().await
                    })
                })
                .await
            }
        }
    }
}
