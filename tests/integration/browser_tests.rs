//! Page release on every exit path

use crate::common::FakeBackend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidewatch::crawler::BrowserPool;
use tidewatch::CrawlError;

fn pool(backend: Arc<FakeBackend>) -> BrowserPool {
    BrowserPool::new(backend, 2, Duration::from_secs(2), Duration::from_millis(200))
}

fn explode() -> Result<(), CrawlError> {
    panic!("selector bug")
}

#[tokio::test]
async fn test_no_page_leaks_across_failures() {
    let backend = FakeBackend::failing();
    let pool = pool(backend.clone());

    let failed: Result<String, _> = pool
        .with_page(|page| Box::pin(async move { page.content().await }))
        .await;
    assert!(matches!(failed, Err(CrawlError::Browser(_))));

    let panicked: Result<(), _> = pool
        .with_page(|_| Box::pin(async move { explode() }))
        .await;
    assert!(matches!(panicked, Err(CrawlError::Panicked(m)) if m.contains("selector bug")));

    let stalled: Result<(), _> = pool
        .with_page(|_| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), CrawlError>(())
            })
        })
        .await;
    assert!(matches!(stalled, Err(CrawlError::Timeout { .. })));

    assert_eq!(backend.opened(), 3);
    assert_eq!(backend.closed(), 3);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.available(), pool.capacity());
}

#[tokio::test]
async fn test_pool_caps_concurrent_pages() {
    let backend = FakeBackend::new("<p>ok</p>");
    let pool = Arc::new(pool(backend.clone()));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let pool = Arc::clone(&pool);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let observer = Arc::clone(&pool);
            pool.with_page(move |page| {
                Box::pin(async move {
                    peak.fetch_max(observer.in_use(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    page.content().await
                })
            })
            .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "<p>ok</p>");
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(backend.closed(), 6);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.available(), 2);
}
