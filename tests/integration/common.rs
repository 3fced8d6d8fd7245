//! Shared fixtures

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tidewatch::config::{
    Config, FetchConfig, PipelineConfig, SchedulePreset, SchedulerConfig, SourceConfig,
    StorageConfig,
};
use tidewatch::crawler::{BrowserBackend, BrowserPage};
use tidewatch::AppContext;
use tidewatch::CrawlError;

/// Page returning fixed HTML, optionally failing on `content`
pub struct FakePage {
    html: String,
    fail: bool,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, _url: &str) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn content(&self) -> Result<String, CrawlError> {
        if self.fail {
            return Err(CrawlError::Browser("renderer crashed".to_string()));
        }
        Ok(self.html.clone())
    }

    async fn close(self: Box<Self>) -> Result<(), CrawlError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBackend {
    pub html: String,
    pub fail: bool,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new(html: &str) -> Arc<Self> {
        Arc::new(Self {
            html: html.to_string(),
            fail: false,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            html: String::new(),
            fail: true,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, CrawlError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            html: self.html.clone(),
            fail: self.fail,
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn shutdown(&self) {}
}

/// Fetch settings that keep retries and pacing short
pub fn fast_fetch() -> FetchConfig {
    FetchConfig {
        timeout_seconds: 1,
        max_retries: 3,
        min_request_delay_ms: 0,
        backoff_initial_ms: 10,
        backoff_max_ms: 50,
        ..FetchConfig::default()
    }
}

pub fn source(id: &str, url: &str, method: &str, schedule: SchedulePreset) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        name: id.to_string(),
        url: url.to_string(),
        dimension: "policy".to_string(),
        group: None,
        crawl_method: Some(method.to_string()),
        crawler_class: None,
        schedule,
        is_enabled: true,
        priority: 2,
        options: Map::new(),
    }
}

pub fn with_option(mut source: SourceConfig, key: &str, value: Value) -> SourceConfig {
    source.options.insert(key.to_string(), value);
    source
}

pub fn config(dir: &TempDir, sources: Vec<SourceConfig>) -> Config {
    Config {
        scheduler: SchedulerConfig {
            jitter_seconds: 0,
            crawl_timeout_seconds: 30,
            shutdown_grace_seconds: 5,
            ..SchedulerConfig::default()
        },
        fetch: fast_fetch(),
        storage: StorageConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        },
        pipeline: PipelineConfig {
            enabled: false,
            ..PipelineConfig::default()
        },
        sources,
        ..Config::default()
    }
}

pub fn app(config: Config) -> AppContext {
    AppContext::builder(config)
        .browser_backend(FakeBackend::new("<html></html>"))
        .build()
        .expect("app builds")
}

pub const LIST_PAGE: &str = r#"<html><body><ul class="news">
    <li><a href="/notice/1">Water quality report</a></li>
    <li><a href="/notice/2">Road closure on Main St</a></li>
    </ul></body></html>"#;

pub const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Bulletin</title>
  <item><title>First</title><link>https://bulletin.example.com/1</link></item>
  <item><title>Second</title><link>https://bulletin.example.com/2</link></item>
</channel></rss>"#;

/// Polls `ready` every 10ms for up to five seconds
pub async fn wait_until(mut ready: impl FnMut() -> bool) {
    for _ in 0..500 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
