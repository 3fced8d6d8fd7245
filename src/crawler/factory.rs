//! Strategy registry and the uniform run wrapper

use super::strategies::{
    ApiCrawler, JsRenderedCrawler, ProfileListCrawler, RssCrawler, SnapshotDiffCrawler,
    StaticHtmlCrawler,
};
use super::{panic_message, CrawlContext, CrawlResult, CrawlStatus, CrawledItem, Crawler};
use crate::config::SourceConfig;
use crate::dedup::{count_new, mark_new, normalize_url};
use crate::{ConfigError, CrawlError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builds a crawler for one source
pub type CrawlerConstructor =
    Arc<dyn Fn(&SourceConfig, &CrawlContext) -> Result<Box<dyn Crawler>, ConfigError> + Send + Sync>;

/// Method keys whose crawls hold a browser page
const BROWSER_METHODS: &[&str] = &["js_rendered", "dynamic", "browser"];

/// Resolves sources to strategies and runs them
///
/// `crawl_method` keys look up the built-in table, `crawler_class` keys the
/// custom table. Keys are case-insensitive and `-` is equivalent to `_`.
pub struct CrawlerFactory {
    ctx: CrawlContext,
    methods: HashMap<String, CrawlerConstructor>,
    classes: HashMap<String, CrawlerConstructor>,
    crawl_timeout: Duration,
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('-', "_")
}

/// Wraps a typed constructor as a [`CrawlerConstructor`]
pub fn constructor<C, F>(build: F) -> CrawlerConstructor
where
    C: Crawler + 'static,
    F: Fn(&SourceConfig, &CrawlContext) -> Result<C, ConfigError> + Send + Sync + 'static,
{
    Arc::new(move |source: &SourceConfig, ctx: &CrawlContext| {
        Ok(Box::new(build(source, ctx)?) as Box<dyn Crawler>)
    })
}

impl CrawlerFactory {
    /// Factory with every built-in strategy registered
    pub fn new(ctx: CrawlContext, crawl_timeout: Duration) -> Self {
        let mut factory = Self {
            ctx,
            methods: HashMap::new(),
            classes: HashMap::new(),
            crawl_timeout,
        };

        let builtins: [(&[&str], CrawlerConstructor); 7] = [
            (&["rss", "feed", "atom"], constructor(RssCrawler::new)),
            (&["static_html", "static", "html"], constructor(StaticHtmlCrawler::new)),
            (BROWSER_METHODS, constructor(JsRenderedCrawler::new)),
            (&["snapshot_diff", "snapshot", "diff"], constructor(SnapshotDiffCrawler::new)),
            (&["social", "social_placeholder", "twitter"], constructor(ApiCrawler::social)),
            (&["json_api", "api"], constructor(ApiCrawler::json_api)),
            (
                &["profile_list", "structured_profile_list", "faculty"],
                constructor(ProfileListCrawler::new),
            ),
        ];
        for (keys, build) in builtins {
            for key in keys {
                factory.register_method(key, Arc::clone(&build));
            }
        }

        factory
    }

    pub fn context(&self) -> &CrawlContext {
        &self.ctx
    }

    /// Registers (or replaces) a built-in method key
    pub fn register_method(&mut self, key: &str, build: CrawlerConstructor) {
        self.methods.insert(normalize_key(key), build);
    }

    /// Registers a custom strategy under a `crawler_class` identifier
    pub fn register_class(&mut self, name: &str, build: CrawlerConstructor) {
        self.classes.insert(normalize_key(name), build);
    }

    /// Whether `key` resolves to a registered strategy
    pub fn knows(&self, source: &SourceConfig) -> bool {
        self.lookup(source).is_ok()
    }

    fn lookup(&self, source: &SourceConfig) -> Result<&CrawlerConstructor, ConfigError> {
        let (table, key) = match (&source.crawler_class, &source.crawl_method) {
            (Some(class), _) => (&self.classes, class),
            (None, Some(method)) => (&self.methods, method),
            (None, None) => return Err(ConfigError::MissingStrategy(source.id.clone())),
        };
        table
            .get(&normalize_key(key))
            .ok_or_else(|| ConfigError::UnknownStrategy {
                source_id: source.id.clone(),
                key: key.clone(),
            })
    }

    /// Builds the crawler for `source`; unknown keys fail here, before any I/O
    pub fn create(&self, source: &SourceConfig) -> Result<Box<dyn Crawler>, ConfigError> {
        let build = self.lookup(source)?;
        build(source, &self.ctx)
    }

    /// Whether crawls of `source` draw from the browser pool
    pub fn uses_browser(&self, source: &SourceConfig) -> bool {
        let by_method = source.crawler_class.is_none()
            && source
                .crawl_method
                .as_deref()
                .map(|m| BROWSER_METHODS.contains(&normalize_key(m).as_str()))
                .unwrap_or(false);
        by_method || source.option_bool("uses_browser").unwrap_or(false)
    }

    fn timeout_for(&self, source: &SourceConfig) -> Duration {
        source
            .option_u64("crawl_timeout_seconds")
            .map(Duration::from_secs)
            .unwrap_or(self.crawl_timeout)
    }

    /// Runs one crawl of `source` and classifies the outcome
    ///
    /// `previous` holds the URL hashes of the last stored snapshot. Only a
    /// configuration fault is returned as `Err`; every strategy failure,
    /// timeout or panic becomes a FAILED result.
    pub async fn run(
        &self,
        source: &SourceConfig,
        previous: &HashSet<String>,
    ) -> Result<CrawlResult, ConfigError> {
        let crawler = self.create(source)?;
        let limit = self.timeout_for(source);

        tracing::debug!(
            source_id = %source.id,
            strategy = source.strategy_key(),
            "Starting crawl of {}",
            source.url
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = tokio::time::timeout(
            limit,
            AssertUnwindSafe(crawler.fetch_and_parse()).catch_unwind(),
        )
        .await;

        let fetched = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(CrawlError::Panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(CrawlError::Timeout {
                seconds: limit.as_secs(),
            }),
        };

        let result = classify(
            &source.id,
            fetched,
            previous,
            started_at,
            Utc::now(),
            clock.elapsed().as_secs_f64(),
        );

        match result.status {
            CrawlStatus::Failed => tracing::error!(
                source_id = %source.id,
                "Crawl failed after {:.1}s: {}",
                result.duration_seconds,
                result.error_message.as_deref().unwrap_or_default()
            ),
            CrawlStatus::Partial => tracing::warn!(
                source_id = %source.id,
                "Crawl partially succeeded: {}",
                result.error_message.as_deref().unwrap_or_default()
            ),
            status => tracing::info!(
                source_id = %source.id,
                "Crawl finished: {} ({} items, {} new) in {:.1}s",
                status,
                result.items_total,
                result.items_new,
                result.duration_seconds
            ),
        }

        Ok(result)
    }
}

/// Drops items with empty URLs or a normalized URL seen earlier in the batch
fn validate_items(items: Vec<CrawledItem>) -> (Vec<CrawledItem>, usize) {
    let before = items.len();
    let mut seen = HashSet::new();
    let kept: Vec<CrawledItem> = items
        .into_iter()
        .filter(|item| !item.url.trim().is_empty())
        .filter(|item| seen.insert(normalize_url(&item.url)))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Derives the single terminal status of a crawl
pub(crate) fn classify(
    source_id: &str,
    fetched: Result<Vec<CrawledItem>, CrawlError>,
    previous: &HashSet<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_seconds: f64,
) -> CrawlResult {
    let mut result = CrawlResult {
        source_id: source_id.to_string(),
        status: CrawlStatus::Failed,
        items: Vec::new(),
        items_total: 0,
        items_new: 0,
        error_message: None,
        started_at,
        finished_at,
        duration_seconds,
    };

    let items = match fetched {
        Ok(items) => items,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };

    let (items, dropped) = validate_items(items);
    let items_new = count_new(&mark_new(&items, previous));

    result.status = if items.is_empty() || items_new == 0 {
        CrawlStatus::NoNewContent
    } else if dropped > 0 {
        CrawlStatus::Partial
    } else {
        CrawlStatus::Success
    };
    if dropped > 0 {
        result.error_message = Some(format!(
            "dropped {} item(s) with an empty or duplicate URL",
            dropped
        ));
    }
    result.items_total = items.len();
    result.items_new = items_new;
    result.items = items;
    result
}
