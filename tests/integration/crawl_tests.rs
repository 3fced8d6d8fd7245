//! Single-source crawls through the application context

use crate::common::{app, config, source, with_option, FEED, LIST_PAGE};
use serde_json::json;
use tempfile::TempDir;
use tidewatch::config::SchedulePreset;
use tidewatch::crawler::RunOutcome;
use tidewatch::{ConfigError, CrawlStatus};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(server: &MockServer, at: &str, body: &str, content_type: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", content_type),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_unchanged_page_yields_no_new_content() {
    let server = MockServer::start().await;
    serve(&server, "/notices", LIST_PAGE, "text/html; charset=utf-8").await;

    let dir = TempDir::new().unwrap();
    let notices = source(
        "city-notices",
        &format!("{}/notices", server.uri()),
        "static",
        SchedulePreset::TwoHourly,
    );
    let app = app(config(&dir, vec![notices.clone()]));

    let first = app.crawl_now("city-notices").await.unwrap();
    let first = first.result().unwrap();
    assert_eq!(first.status, CrawlStatus::Success);
    assert_eq!(first.items_total, 2);
    assert_eq!(first.items_new, 2);
    assert!(first.items.iter().all(|i| i.url.starts_with(&server.uri())));

    let second = app.crawl_now("city-notices").await.unwrap();
    let second = second.result().unwrap();
    assert_eq!(second.status, CrawlStatus::NoNewContent);
    assert_eq!(second.items_new, 0);

    let snapshot = app.runner().snapshots().load(&notices).unwrap().unwrap();
    assert_eq!(snapshot.item_count, 2);
    assert_eq!(snapshot.new_item_count, 0);
    assert!(snapshot.previous_crawled_at.is_some());

    let logs = app.recent_logs(Some("city-notices"), 10).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].status, CrawlStatus::NoNewContent);
    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_crawl_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let bulletin = source(
        "bulletin",
        &format!("{}/feed.xml", server.uri()),
        "rss",
        SchedulePreset::Hourly,
    );
    let app = app(config(&dir, vec![bulletin.clone()]));

    let ok = app.crawl_now("bulletin").await.unwrap();
    assert_eq!(ok.result().unwrap().status, CrawlStatus::Success);

    let failed = app.crawl_now("bulletin").await.unwrap();
    let failed = failed.result().unwrap();
    assert_eq!(failed.status, CrawlStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap().contains("500"));

    let snapshot = app.runner().snapshots().load(&bulletin).unwrap().unwrap();
    assert_eq!(snapshot.item_count, 2);

    let state = app.source_state("bulletin").unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 1);
    assert!(state.last_success_at.is_some());
    app.shutdown().await;
}

#[tokio::test]
async fn test_unknown_method_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let odd = source("odd", "https://example.com", "carrier_pigeon", SchedulePreset::Daily);
    let app = app(config(&dir, vec![odd]));

    match app.crawl_now("odd").await.unwrap() {
        RunOutcome::Misconfigured(ConfigError::UnknownStrategy { key, .. }) => {
            assert_eq!(key, "carrier_pigeon")
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(app.recent_logs(Some("odd"), 10).unwrap().is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn test_source_overrides_apply() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(FEED)
                .set_delay(std::time::Duration::from_millis(1500)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let slow = with_option(
        with_option(
            source("slow", &format!("{}/slow", server.uri()), "rss", SchedulePreset::Daily),
            "timeout_seconds",
            json!(3),
        ),
        "max_retries",
        json!(1),
    );
    let app = app(config(&dir, vec![slow]));

    let outcome = app.crawl_now("slow").await.unwrap();
    assert_eq!(outcome.result().unwrap().status, CrawlStatus::Success);
    app.shutdown().await;
}
