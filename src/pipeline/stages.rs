//! Built-in pipeline stages

use super::{PipelineStage, StageOutcome};
use crate::config::{Config, HookStageConfig, SourceConfig};
use crate::crawler::{CrawlStatus, RunOutcome, SourceRunner};
use crate::output::{write_briefing, write_index};
use crate::FetchError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Crawls every enabled source
///
/// Browser-backed sources and everything else draw from separate
/// concurrency caps. Sources are started in priority order.
pub struct CrawlAllStage {
    runner: Arc<SourceRunner>,
    sources: Arc<[SourceConfig]>,
    browser_slots: Arc<Semaphore>,
    default_slots: Arc<Semaphore>,
}

impl CrawlAllStage {
    pub fn new(
        runner: Arc<SourceRunner>,
        sources: Arc<[SourceConfig]>,
        browser_concurrency: usize,
        default_concurrency: usize,
    ) -> Self {
        Self {
            runner,
            sources,
            browser_slots: Arc::new(Semaphore::new(browser_concurrency.max(1))),
            default_slots: Arc::new(Semaphore::new(default_concurrency.max(1))),
        }
    }

    fn enabled_sources(&self) -> Vec<SourceConfig> {
        let state = self.runner.state();
        let mut enabled: Vec<SourceConfig> = self
            .sources
            .iter()
            .filter(|source| match state.is_enabled(source) {
                Ok(enabled) => enabled,
                Err(e) => {
                    tracing::warn!(source_id = %source.id, "Could not read runtime state: {}", e);
                    source.is_enabled
                }
            })
            .cloned()
            .collect();
        enabled.sort_by_key(|s| s.priority);
        enabled
    }
}

#[async_trait]
impl PipelineStage for CrawlAllStage {
    fn name(&self) -> &str {
        "crawl"
    }

    async fn run(&self) -> anyhow::Result<StageOutcome> {
        let sources = self.enabled_sources();
        tracing::info!("Crawling {} enabled sources", sources.len());

        let mut set = JoinSet::new();
        for source in sources {
            let slots = if self.runner.factory().uses_browser(&source) {
                Arc::clone(&self.browser_slots)
            } else {
                Arc::clone(&self.default_slots)
            };
            let runner = Arc::clone(&self.runner);
            set.spawn(async move {
                // The semaphores are never closed
                let _permit = slots.acquire_owned().await.ok();
                let outcome = runner.run(&source).await;
                (source.id, outcome)
            });
        }

        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        let mut results = Map::new();
        let mut failed = Vec::new();
        let mut items_new = 0;

        while let Some(joined) = set.join_next().await {
            let (source_id, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("Crawl task aborted: {}", e);
                    *counts.entry("aborted").or_insert(0) += 1;
                    continue;
                }
            };

            let label = match &outcome {
                RunOutcome::Completed(result) => {
                    items_new += result.items_new;
                    if result.status == CrawlStatus::Failed {
                        failed.push(json!({
                            "source_id": source_id,
                            "error": result.error_message,
                        }));
                    }
                    result.status.as_str()
                }
                RunOutcome::AlreadyRunning => "already_running",
                RunOutcome::Misconfigured(e) => {
                    failed.push(json!({ "source_id": source_id, "error": e.to_string() }));
                    "misconfigured"
                }
            };
            *counts.entry(label).or_insert(0) += 1;
            results.insert(source_id, Value::from(label));
        }

        let mut summary = Map::new();
        summary.insert("total".to_string(), Value::from(results.len()));
        for (label, count) in counts {
            summary.insert(label.to_string(), Value::from(count));
        }
        summary.insert("items_new".to_string(), Value::from(items_new));
        summary.insert("failed_sources".to_string(), Value::Array(failed));
        summary.insert("results".to_string(), Value::Object(results));
        Ok(StageOutcome::Done(summary))
    }
}

/// POSTs to an external processing service
///
/// Skipped when no endpoint is configured. A non-2xx response fails the
/// stage; a JSON object response becomes the stage summary.
pub struct HookStage {
    config: HookStageConfig,
    client: reqwest::Client,
}

impl HookStage {
    pub fn new(config: HookStageConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl PipelineStage for HookStage {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self) -> anyhow::Result<StageOutcome> {
        let Some(endpoint) = self.config.resolve_endpoint() else {
            return Ok(StageOutcome::Skipped(format!(
                "no endpoint configured for stage '{}'",
                self.config.name
            )));
        };

        let response = self
            .client
            .post(&endpoint)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .json(&json!({
                "stage": self.config.name,
                "triggered_at": Utc::now(),
            }))
            .send()
            .await
            .with_context(|| format!("request to {} failed", endpoint))?;

        let status = response.status();
        let body = response.text().await.with_context(|| {
            format!(
                "unreadable response body from {} (HTTP {})",
                endpoint,
                status.as_u16()
            )
        })?;
        if !status.is_success() {
            anyhow::bail!("{} returned HTTP {}: {}", endpoint, status.as_u16(), body.trim());
        }

        let summary = match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("http_status".to_string(), Value::from(status.as_u16()));
                map
            }
        };
        Ok(StageOutcome::Done(summary))
    }
}

/// Writes `index.json` next to the snapshot directory
pub struct IndexStage {
    runner: Arc<SourceRunner>,
    path: PathBuf,
}

impl IndexStage {
    pub fn new(runner: Arc<SourceRunner>, path: PathBuf) -> Self {
        Self { runner, path }
    }
}

#[async_trait]
impl PipelineStage for IndexStage {
    fn name(&self) -> &str {
        "index"
    }

    async fn run(&self) -> anyhow::Result<StageOutcome> {
        let index = write_index(self.runner.snapshots(), &self.path)?;
        let mut summary = Map::new();
        summary.insert("sources".to_string(), Value::from(index.sources.len()));
        summary.insert("items".to_string(), Value::from(index.total_items));
        summary.insert("new_items".to_string(), Value::from(index.total_new_items));
        summary.insert("path".to_string(), Value::from(self.path.display().to_string()));
        Ok(StageOutcome::Done(summary))
    }
}

/// Writes the markdown briefing of new items
pub struct BriefingStage {
    runner: Arc<SourceRunner>,
    dir: PathBuf,
}

impl BriefingStage {
    pub fn new(runner: Arc<SourceRunner>, dir: PathBuf) -> Self {
        Self { runner, dir }
    }
}

#[async_trait]
impl PipelineStage for BriefingStage {
    fn name(&self) -> &str {
        "briefing"
    }

    async fn run(&self) -> anyhow::Result<StageOutcome> {
        let snapshots = self.runner.snapshots().all()?;
        let new_items: usize = snapshots.iter().map(|s| s.new_items().count()).sum();
        let path = write_briefing(&self.dir, &snapshots, Utc::now())?;

        let mut summary = Map::new();
        summary.insert("new_items".to_string(), Value::from(new_items));
        summary.insert("path".to_string(), Value::from(path.display().to_string()));
        Ok(StageOutcome::Done(summary))
    }
}

/// Crawl, then each configured hook, then index and briefing
pub fn default_stages(
    config: &Config,
    runner: Arc<SourceRunner>,
    sources: Arc<[SourceConfig]>,
) -> Result<Vec<Arc<dyn PipelineStage>>, FetchError> {
    let data_dir = PathBuf::from(&config.storage.data_dir);
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| FetchError::Network {
            url: String::new(),
            message: format!("failed to build hook HTTP client: {}", e),
        })?;

    let mut stages: Vec<Arc<dyn PipelineStage>> = vec![Arc::new(CrawlAllStage::new(
        Arc::clone(&runner),
        sources,
        config.pipeline.browser_concurrency,
        config.pipeline.default_concurrency,
    ))];
    for hook in &config.pipeline.stages {
        stages.push(Arc::new(HookStage::new(hook.clone(), client.clone())));
    }
    stages.push(Arc::new(IndexStage::new(
        Arc::clone(&runner),
        data_dir.join("index.json"),
    )));
    stages.push(Arc::new(BriefingStage::new(runner, data_dir.join("briefings"))));
    Ok(stages)
}
