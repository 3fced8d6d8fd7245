//! Manual triggers and job coalescing

use crate::common::{config, wait_until, FakeBackend};
use async_trait::async_trait;
use serde_json::Map;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tidewatch::config::{SchedulePreset, SourceConfig};
use tidewatch::crawler::{constructor, CrawledItem, Crawler, RunOutcome};
use tidewatch::scheduler::JobState;
use tidewatch::{AppContext, CrawlError, CrawlStatus, TriggerOutcome};
use tokio::sync::Notify;

struct Gated {
    calls: Arc<AtomicUsize>,
    release: Arc<Notify>,
}

#[async_trait]
impl Crawler for Gated {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(vec![CrawledItem::new(
            "Quarterly figures",
            "https://stats.example.com/q3",
            "stats",
            "economy",
        )])
    }
}

fn gated_source() -> SourceConfig {
    SourceConfig {
        id: "stats".to_string(),
        name: "Statistics bureau".to_string(),
        url: "https://stats.example.com".to_string(),
        dimension: "economy".to_string(),
        group: None,
        crawl_method: None,
        crawler_class: Some("Gated".to_string()),
        schedule: SchedulePreset::Daily,
        is_enabled: true,
        priority: 1,
        options: Map::new(),
    }
}

fn gated_app(dir: &TempDir, calls: &Arc<AtomicUsize>, release: &Arc<Notify>) -> AppContext {
    let calls = Arc::clone(calls);
    let release = Arc::clone(release);
    AppContext::builder(config(dir, vec![gated_source()]))
        .browser_backend(FakeBackend::new(""))
        .register_class(
            "gated",
            constructor(move |_, _| {
                Ok(Gated {
                    calls: Arc::clone(&calls),
                    release: Arc::clone(&release),
                })
            }),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_second_trigger_is_coalesced() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());
    let app = gated_app(&dir, &calls, &release);
    app.start();

    assert_eq!(app.trigger_source("stats"), TriggerOutcome::Accepted);
    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;

    assert_eq!(app.trigger_source("stats"), TriggerOutcome::AlreadyRunning);
    assert!(matches!(
        app.crawl_now("stats").await.unwrap(),
        RunOutcome::AlreadyRunning
    ));
    assert_eq!(app.trigger_source("unknown"), TriggerOutcome::NotFound);

    release.notify_one();
    wait_until(|| !app.runner().is_running("stats")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let logs = app.recent_logs(Some("stats"), 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, CrawlStatus::Success);
    app.shutdown().await;
}

#[tokio::test]
async fn test_jobs_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());
    let app = gated_app(&dir, &calls, &release);
    app.start();

    wait_until(|| {
        app.jobs()
            .iter()
            .any(|j| j.id == "stats" && j.state == JobState::Scheduled)
    })
    .await;
    let job = app.jobs().into_iter().find(|j| j.id == "stats").unwrap();
    assert!(job.next_run.unwrap() > chrono::Utc::now());

    app.set_source_enabled("stats", false).unwrap();
    let job = app.jobs().into_iter().find(|j| j.id == "stats").unwrap();
    assert_eq!(job.state, JobState::Disabled);

    app.shutdown().await;
    app.shutdown().await;
    assert_eq!(app.trigger_source("stats"), TriggerOutcome::ShuttingDown);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
