//! Full pipeline runs

use crate::common::{app, config, source, FEED, LIST_PAGE};
use std::time::Duration;
use tempfile::TempDir;
use tidewatch::config::{HookStageConfig, SchedulePreset};
use tidewatch::pipeline::{PipelineResult, PipelineStatus, StageStatus};
use tidewatch::{AppContext, CrawlStatus, TriggerOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn finished_result(app: &AppContext) -> PipelineResult {
    for _ in 0..300 {
        if let Some(result) = app.last_pipeline_result() {
            if result.status != PipelineStatus::Running {
                return result;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("pipeline did not finish in time");
}

async fn list_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(LIST_PAGE)
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_failing_source_does_not_stop_pipeline() {
    let feed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(FEED)
                .set_delay(Duration::from_secs(2)),
        )
        .expect(3)
        .mount(&feed_server)
        .await;
    let list_server = list_server().await;

    let dir = TempDir::new().unwrap();
    let sources = vec![
        source(
            "a",
            &format!("{}/feed.xml", feed_server.uri()),
            "rss",
            SchedulePreset::Daily,
        ),
        source(
            "b",
            &format!("{}/notices", list_server.uri()),
            "static",
            SchedulePreset::TwoHourly,
        ),
    ];
    let app = app(config(&dir, sources));

    assert!(app.last_pipeline_result().is_none());
    assert_eq!(app.trigger_pipeline(), TriggerOutcome::Accepted);
    let result = finished_result(&app).await;

    let names: Vec<_> = result.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["crawl", "index", "briefing"]);
    assert!(result.stages.iter().all(|s| s.status == StageStatus::Success));
    assert_eq!(result.status, PipelineStatus::Success);

    let crawl = &result.stage("crawl").unwrap().summary;
    assert_eq!(crawl["total"], 2);
    assert_eq!(crawl["failed"], 1);
    assert_eq!(crawl["success"], 1);
    assert_eq!(crawl["results"]["a"], "failed");
    assert_eq!(crawl["results"]["b"], "success");
    assert_eq!(crawl["failed_sources"][0]["source_id"], "a");
    assert!(crawl["failed_sources"][0]["error"]
        .as_str()
        .unwrap()
        .contains("3 attempts"));

    let a = &app.recent_logs(Some("a"), 1).unwrap()[0];
    assert_eq!(a.status, CrawlStatus::Failed);
    assert!(!a.error_message.as_deref().unwrap_or_default().is_empty());
    let b = &app.recent_logs(Some("b"), 1).unwrap()[0];
    assert_eq!(b.status, CrawlStatus::Success);

    assert!(dir.path().join("index.json").exists());
    assert!(dir.path().join("briefings").read_dir().unwrap().next().is_some());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["stages"][0]["name"], "crawl");
    assert_eq!(json["stages"][0]["status"], "success");
    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_hook_is_partial_failure() {
    let list_server = list_server().await;
    let hook_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/enrich"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model offline"))
        .expect(1)
        .mount(&hook_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = config(
        &dir,
        vec![source(
            "notices",
            &format!("{}/notices", list_server.uri()),
            "static_html",
            SchedulePreset::Hourly,
        )],
    );
    config.pipeline.stages = vec![
        HookStageConfig {
            name: "enrich".to_string(),
            endpoint: Some(format!("{}/enrich", hook_server.uri())),
            endpoint_env: None,
            timeout_seconds: 5,
        },
        HookStageConfig {
            name: "summarize".to_string(),
            endpoint: None,
            endpoint_env: None,
            timeout_seconds: 5,
        },
    ];
    let app = app(config);

    let result = app.run_pipeline_now().await.unwrap();
    assert_eq!(result.status, PipelineStatus::PartialFailure);

    let statuses: Vec<_> = result.stages.iter().map(|s| (s.name.as_str(), s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("crawl", StageStatus::Success),
            ("enrich", StageStatus::Failed),
            ("summarize", StageStatus::Skipped),
            ("index", StageStatus::Success),
            ("briefing", StageStatus::Success),
        ]
    );
    assert!(result.stage("enrich").unwrap().error.as_deref().unwrap().contains("500"));
    assert!(result.stage("summarize").unwrap().summary["reason"]
        .as_str()
        .unwrap()
        .contains("summarize"));
    assert_eq!(result.stage("index").unwrap().summary["new_items"], 2);
    app.shutdown().await;
}

#[tokio::test]
async fn test_disabled_source_is_left_out() {
    let list_server = list_server().await;
    let dir = TempDir::new().unwrap();
    let url = format!("{}/notices", list_server.uri());
    let app = app(config(
        &dir,
        vec![
            source("kept", &url, "static", SchedulePreset::Daily),
            source("muted", &url, "static", SchedulePreset::Daily),
        ],
    ));

    app.set_source_enabled("muted", false).unwrap();
    let result = app.run_pipeline_now().await.unwrap();

    let results = &result.stage("crawl").unwrap().summary["results"];
    assert_eq!(results["kept"], "success");
    assert!(results.get("muted").is_none());
    assert_eq!(
        app.source_state("muted").unwrap().unwrap().is_enabled_override,
        Some(false)
    );
    app.shutdown().await;
}
