//! Application context
//!
//! [`AppContext`] owns every long-lived component and is the one handle
//! callers use to start, steer and stop the engine. Build it once with
//! [`AppContext::new`] (or [`AppContext::builder`] to swap the browser
//! backend or register custom strategies), call [`AppContext::start`],
//! and finish with [`AppContext::shutdown`].

use crate::config::{Config, SourceConfig};
use crate::crawler::{
    BrowserBackend, BrowserPool, CrawlContext, CrawlerConstructor, CrawlerFactory, FetchClient,
    RunOutcome, SourceRunner,
};
use crate::output::{build_status_report, IncrementalSnapshotWriter, StatusReport};
use crate::pipeline::{default_stages, PipelineResult, PipelineRunner, PipelineStage};
use crate::scheduler::{JobInfo, Scheduler};
use crate::state::{CrawlLogEntry, CrawlLogStore, CrawlStateStore, SourceRuntimeState};
use crate::storage::{open_store, snapshot_dir};
use crate::TideError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use crate::scheduler::TriggerOutcome;

/// Optional overrides applied while building an [`AppContext`]
pub struct AppBuilder {
    config: Config,
    backend: Option<Arc<dyn BrowserBackend>>,
    classes: Vec<(String, CrawlerConstructor)>,
    stages: Option<Vec<Arc<dyn PipelineStage>>>,
}

impl AppBuilder {
    /// Uses `backend` instead of launching Chrome
    pub fn browser_backend(mut self, backend: Arc<dyn BrowserBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Adds a custom strategy selectable through `crawler_class`
    pub fn register_class(mut self, name: &str, build: CrawlerConstructor) -> Self {
        self.classes.push((name.to_string(), build));
        self
    }

    /// Replaces the default stage list
    pub fn stages(mut self, stages: Vec<Arc<dyn PipelineStage>>) -> Self {
        self.stages = Some(stages);
        self
    }

    pub fn build(self) -> Result<AppContext, TideError> {
        let config = self.config;

        let store = open_store(&config.storage)?;
        let state = Arc::new(CrawlStateStore::new(Arc::clone(&store)));
        let logs = CrawlLogStore::new(store, config.storage.log_cap);

        let fetch = Arc::new(FetchClient::new(&config.fetch)?);
        let browser = Arc::new(match self.backend {
            Some(backend) => BrowserPool::new(
                backend,
                config.browser.max_pages,
                Duration::from_secs(config.browser.acquire_timeout_seconds),
                Duration::from_secs(config.browser.page_timeout_seconds),
            ),
            None => BrowserPool::chrome(&config.browser, config.fetch.user_agents.first().cloned()),
        });

        let ctx = CrawlContext {
            fetch,
            browser: Arc::clone(&browser),
            fetch_config: config.fetch.clone(),
            state: Arc::clone(&state),
        };
        let mut factory = CrawlerFactory::new(
            ctx,
            Duration::from_secs(config.scheduler.crawl_timeout_seconds),
        );
        for (name, build) in self.classes {
            factory.register_class(&name, build);
        }

        let snapshots = IncrementalSnapshotWriter::open(&snapshot_dir(&config.storage))?;
        let runner = Arc::new(SourceRunner::new(factory, snapshots, logs, state));

        let sources: Arc<[SourceConfig]> = config.sources.clone().into();
        for source in sources.iter() {
            if !runner.factory().knows(source) {
                tracing::warn!(
                    source_id = %source.id,
                    "Unknown crawl strategy '{}'; crawls of this source will be skipped",
                    source.strategy_key()
                );
            }
        }

        let stages = match self.stages {
            Some(stages) => stages,
            None => default_stages(&config, Arc::clone(&runner), Arc::clone(&sources))?,
        };
        let pipeline = Arc::new(PipelineRunner::new(stages));

        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            config.pipeline.clone(),
            sources,
            runner,
            pipeline,
        );

        tracing::debug!("Application context built with {} sources", config.sources.len());
        Ok(AppContext {
            config,
            browser,
            scheduler,
            stopped: AtomicBool::new(false),
        })
    }
}

pub struct AppContext {
    config: Config,
    browser: Arc<BrowserPool>,
    scheduler: Scheduler,
    stopped: AtomicBool,
}

impl AppContext {
    /// Context with the default Chrome backend and stage list
    pub fn new(config: Config) -> Result<Self, TideError> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder {
            config,
            backend: None,
            classes: Vec::new(),
            stages: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sources(&self) -> &[SourceConfig] {
        self.scheduler.sources()
    }

    pub fn runner(&self) -> &Arc<SourceRunner> {
        self.scheduler.runner()
    }

    pub fn browser(&self) -> &Arc<BrowserPool> {
        &self.browser
    }

    /// Starts the recurring jobs
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn trigger_source(&self, source_id: &str) -> TriggerOutcome {
        self.scheduler.trigger_source(source_id)
    }

    pub fn trigger_pipeline(&self) -> TriggerOutcome {
        self.scheduler.trigger_pipeline()
    }

    /// Crawls one source and waits for the result
    pub async fn crawl_now(&self, source_id: &str) -> Result<RunOutcome, TideError> {
        let source = self
            .sources()
            .iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| TideError::UnknownSource(source_id.to_string()))?;
        Ok(self.runner().run(source).await)
    }

    /// Runs the pipeline and waits for it; `None` if a run is in progress
    pub async fn run_pipeline_now(&self) -> Option<PipelineResult> {
        self.scheduler.pipeline().run().await
    }

    /// The latest pipeline result, `None` if it never ran
    pub fn last_pipeline_result(&self) -> Option<PipelineResult> {
        self.scheduler.pipeline().last_result()
    }

    pub fn set_source_enabled(&self, source_id: &str, enabled: bool) -> Result<(), TideError> {
        self.scheduler.set_source_enabled(source_id, enabled)
    }

    pub fn source_state(&self, source_id: &str) -> Result<Option<SourceRuntimeState>, TideError> {
        Ok(self.runner().state().get(source_id)?)
    }

    /// Newest log entries first, optionally for one source
    pub fn recent_logs(
        &self,
        source_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CrawlLogEntry>, TideError> {
        Ok(self.runner().logs().query(source_id, limit)?)
    }

    pub fn status_report(&self, recent: usize) -> Result<StatusReport, TideError> {
        let runner = self.runner();
        Ok(build_status_report(
            self.sources(),
            runner.state(),
            runner.logs(),
            recent,
        )?)
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.scheduler.jobs()
    }

    /// Stops the scheduler, waits out the grace period, stops the browser
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown().await;
        self.browser.shutdown().await;
        tracing::info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulePreset, StorageConfig};
    use crate::crawler::testing::FakeBackend;
    use crate::crawler::{constructor, CrawledItem, Crawler};
    use crate::CrawlError;
    use async_trait::async_trait;
    use serde_json::Map;
    use tempfile::TempDir;

    struct Fixed;

    #[async_trait]
    impl Crawler for Fixed {
        async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
            Ok(vec![CrawledItem::new(
                "Budget released",
                "https://example.com/budget",
                "treasury",
                "policy",
            )])
        }
    }

    fn config(dir: &TempDir) -> Config {
        Config {
            storage: StorageConfig {
                data_dir: dir.path().to_string_lossy().into_owned(),
                ..StorageConfig::default()
            },
            sources: vec![SourceConfig {
                id: "treasury".to_string(),
                name: "Treasury".to_string(),
                url: "https://example.com/treasury".to_string(),
                dimension: "policy".to_string(),
                group: None,
                crawl_method: None,
                crawler_class: Some("fixed".to_string()),
                schedule: SchedulePreset::Daily,
                is_enabled: true,
                priority: 1,
                options: Map::new(),
            }],
            ..Config::default()
        }
    }

    fn app(dir: &TempDir) -> AppContext {
        AppContext::builder(config(dir))
            .browser_backend(Arc::new(FakeBackend::new("")))
            .register_class("fixed", constructor(|_, _| Ok(Fixed)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_crawl_now_records_state_and_logs() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let outcome = app.crawl_now("treasury").await.unwrap();
        assert_eq!(outcome.result().unwrap().items_new, 1);
        assert!(matches!(
            app.crawl_now("nope").await,
            Err(TideError::UnknownSource(_))
        ));

        let state = app.source_state("treasury").unwrap().unwrap();
        assert!(state.last_success_at.is_some());
        assert_eq!(app.recent_logs(Some("treasury"), 5).unwrap().len(), 1);
        assert!(dir.path().join("raw").join("policy").exists());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_pipeline_result_is_retained() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        assert!(app.last_pipeline_result().is_none());

        let result = app.run_pipeline_now().await.unwrap();
        let names: Vec<_> = result.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["crawl", "index", "briefing"]);
        assert_eq!(app.last_pipeline_result().unwrap().started_at, result.started_at);
        assert!(dir.path().join("index.json").exists());

        app.shutdown().await;
        app.shutdown().await;
    }
}
