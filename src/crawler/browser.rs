//! Bounded pool of headless-browser pages
//!
//! One browser process is launched lazily and shared by every JS-rendered
//! crawl. Each page gets its own browser context, and both are torn down on
//! every exit path of [`BrowserPool::with_page`].

use crate::config::BrowserConfig;
use crate::CrawlError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

/// An open browser page
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigates and waits for the load event
    async fn goto(&self, url: &str) -> Result<(), CrawlError>;

    /// Waits until `selector` matches an element
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), CrawlError>;

    /// Serialized DOM of the current document
    async fn content(&self) -> Result<String, CrawlError>;

    /// Closes the page and releases its isolation context
    async fn close(self: Box<Self>) -> Result<(), CrawlError>;
}

/// Source of pages for the pool
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, CrawlError>;

    /// Stops the underlying browser; later `open_page` calls fail
    async fn shutdown(&self);
}

/// Concurrency-capped access to browser pages
pub struct BrowserPool {
    backend: Arc<dyn BrowserBackend>,
    permits: Semaphore,
    capacity: usize,
    acquire_timeout: Duration,
    page_timeout: Duration,
    open_pages: AtomicUsize,
}

impl BrowserPool {
    pub fn new(
        backend: Arc<dyn BrowserBackend>,
        capacity: usize,
        acquire_timeout: Duration,
        page_timeout: Duration,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            permits: Semaphore::new(capacity),
            capacity,
            acquire_timeout,
            page_timeout,
            open_pages: AtomicUsize::new(0),
        }
    }

    /// Pool backed by a lazily launched Chrome
    pub fn chrome(config: &BrowserConfig, user_agent: Option<String>) -> Self {
        Self::new(
            Arc::new(ChromeBackend::new(config.clone(), user_agent)),
            config.max_pages,
            Duration::from_secs(config.acquire_timeout_seconds),
            Duration::from_secs(config.page_timeout_seconds),
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Page slots not currently held by a caller
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Pages currently open
    pub fn in_use(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }

    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }

    /// Runs `f` with a fresh page
    ///
    /// Waits for a free slot (bounded by the acquire timeout), bounds `f` by
    /// the page timeout and closes the page whether `f` returns, fails,
    /// times out, panics or is dropped by the caller.
    pub async fn with_page<T, F>(&self, f: F) -> Result<T, CrawlError>
    where
        T: Send,
        F: for<'p> FnOnce(&'p dyn BrowserPage) -> BoxFuture<'p, Result<T, CrawlError>>,
    {
        let _permit = match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(CrawlError::Browser("browser pool is closed".to_string())),
            Err(_) => {
                return Err(CrawlError::Browser(format!(
                    "no browser page free after {}s",
                    self.acquire_timeout.as_secs()
                )))
            }
        };

        let lease = PageLease::new(self.backend.open_page().await?, &self.open_pages);
        let Some(page) = lease.page.as_deref() else {
            return Err(CrawlError::Browser("browser page already released".to_string()));
        };

        let outcome =
            tokio::time::timeout(self.page_timeout, AssertUnwindSafe(f(page)).catch_unwind())
                .await;
        lease.release().await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CrawlError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(CrawlError::Timeout {
                seconds: self.page_timeout.as_secs(),
            }),
        }
    }

    /// Stops accepting callers and shuts the browser down
    pub async fn shutdown(&self) {
        self.permits.close();
        self.backend.shutdown().await;
    }
}

/// An open page counted in `open_pages`
///
/// Dropping the lease without [`PageLease::release`] (the caller's future was
/// cancelled) closes the page on a spawned task.
struct PageLease<'a> {
    page: Option<Box<dyn BrowserPage>>,
    open_pages: &'a AtomicUsize,
}

impl<'a> PageLease<'a> {
    fn new(page: Box<dyn BrowserPage>, open_pages: &'a AtomicUsize) -> Self {
        open_pages.fetch_add(1, Ordering::SeqCst);
        Self {
            page: Some(page),
            open_pages,
        }
    }

    async fn release(mut self) {
        if let Some(page) = self.page.take() {
            close_page(page).await;
        }
    }
}

impl Drop for PageLease<'_> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    tracing::debug!("Page holder cancelled; closing page in the background");
                    handle.spawn(close_page(page));
                }
                Err(_) => tracing::warn!("Browser page dropped outside the runtime; not closed"),
            }
        }
        self.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn close_page(page: Box<dyn BrowserPage>) {
    if let Err(e) = page.close().await {
        tracing::warn!("Failed to close browser page: {}", e);
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct ChromeShared {
    config: BrowserConfig,
    user_agent: Option<String>,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// Chrome driven over the DevTools protocol
pub struct ChromeBackend {
    shared: Arc<ChromeShared>,
}

impl ChromeBackend {
    pub fn new(config: BrowserConfig, user_agent: Option<String>) -> Self {
        Self {
            shared: Arc::new(ChromeShared {
                config,
                user_agent,
                browser: Mutex::new(None),
                handler: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    async fn launch(&self) -> Result<Browser, CrawlError> {
        let config = &self.shared.config;
        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .window_size(config.viewport_width, config.viewport_height)
            .request_timeout(Duration::from_secs(config.page_timeout_seconds))
            .arg(format!("--lang={}", config.locale))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let chrome_config = builder.build().map_err(CrawlError::Browser)?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| CrawlError::Browser(format!("failed to launch browser: {}", e)))?;

        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        *self.shared.handler.lock().await = Some(task);

        tracing::info!(
            "Launched browser ({}x{}, locale {})",
            config.viewport_width,
            config.viewport_height,
            config.locale
        );
        Ok(browser)
    }
}

#[async_trait]
impl BrowserBackend for ChromeBackend {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, CrawlError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(CrawlError::Browser("browser has been shut down".to_string()));
        }

        let mut guard = self.shared.browser.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let browser = guard
            .as_ref()
            .ok_or_else(|| CrawlError::Browser("browser unavailable".to_string()))?;

        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| CrawlError::Browser(format!("failed to create context: {}", e)))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(CrawlError::Browser)?;
        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(CrawlError::Browser(format!("failed to open page: {}", e)));
            }
        };
        drop(guard);

        if let Some(agent) = self.shared.user_agent.as_deref() {
            if let Err(e) = page.set_user_agent(agent).await {
                tracing::debug!("Could not set page user agent: {}", e);
            }
        }

        Ok(Box::new(ChromePage {
            page,
            context_id,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut browser) = self.shared.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!("Error closing browser: {}", e);
            }
            let _ = browser.wait().await;
            tracing::info!("Browser stopped");
        }
        if let Some(task) = self.shared.handler.lock().await.take() {
            task.abort();
        }
    }
}

struct ChromePage {
    page: Page,
    context_id: BrowserContextId,
    shared: Arc<ChromeShared>,
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), CrawlError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| CrawlError::Browser(format!("navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), CrawlError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::Browser(format!(
                    "selector '{}' did not appear within {}s",
                    selector,
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn content(&self) -> Result<String, CrawlError> {
        self.page
            .content()
            .await
            .map_err(|e| CrawlError::Browser(format!("failed to read page content: {}", e)))
    }

    async fn close(self: Box<Self>) -> Result<(), CrawlError> {
        let ChromePage {
            page,
            context_id,
            shared,
        } = *self;

        let closed = page.close().await;

        if let Some(browser) = shared.browser.lock().await.as_ref() {
            if let Err(e) = browser
                .execute(DisposeBrowserContextParams::new(context_id))
                .await
            {
                tracing::debug!("Failed to dispose browser context: {}", e);
            }
        }

        closed.map_err(|e| CrawlError::Browser(format!("failed to close page: {}", e)))
    }
}
