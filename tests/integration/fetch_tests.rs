//! Per-host pacing and retries of the fetch client

use crate::common::fast_fetch;
use std::time::{Duration, Instant};
use tidewatch::config::FetchConfig;
use tidewatch::crawler::FetchClient;
use tidewatch::FetchError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_same_host_requests_are_spaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(4)
        .mount(&server)
        .await;

    let client = FetchClient::new(&FetchConfig {
        min_request_delay_ms: 150,
        ..fast_fetch()
    })
    .unwrap();
    let options = client.default_options();

    let started = Instant::now();
    let urls: Vec<String> = (0..4).map(|i| format!("{}/page/{}", server.uri(), i)).collect();
    let results =
        futures::future::join_all(urls.iter().map(|url| client.fetch_text(url, &options))).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(
        elapsed >= Duration::from_millis(3 * 150),
        "four requests finished in {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = FetchClient::new(&fast_fetch()).unwrap();
    let err = client
        .fetch_text(&format!("{}/flaky", server.uri()), &client.default_options())
        .await
        .unwrap_err();

    match err {
        FetchError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FetchError::Http { status: 503, .. }));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_recovers_after_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&fast_fetch()).unwrap();
    let body = client
        .fetch_text(&format!("{}/feed", server.uri()), &client.default_options())
        .await
        .unwrap();
    assert_eq!(body, "<rss/>");
}

#[tokio::test]
async fn test_request_count_visible_while_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let client = FetchClient::new(&fast_fetch()).unwrap();
    let options = client.default_options();
    let host = server.address().to_string();
    let url = format!("{}/slow", server.uri());

    let (result, in_flight) = tokio::join!(client.fetch_text(&url, &options), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        client.request_count(&host)
    });

    assert_eq!(result.unwrap(), "slow");
    assert_eq!(in_flight, 1);
    assert_eq!(client.request_count(&host), 1);
}
