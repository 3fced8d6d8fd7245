//! Paced, retrying HTTP access
//!
//! This module handles every plain HTTP request a crawl strategy makes:
//! - One in-flight request per host, with a minimum spacing between requests
//! - Exponential backoff with jitter between attempts
//! - Rotation of browser-like user agents
//! - Decoding of legacy text encodings

use crate::config::{FetchConfig, SourceConfig};
use crate::state::HostState;
use crate::FetchError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

/// Per-request settings
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Forces a text encoding label (e.g. `gbk`) instead of the response charset
    pub encoding: Option<String>,
    pub timeout: Duration,
    /// Total number of attempts, at least one
    pub max_retries: u32,
    /// Minimum spacing between two requests to the same host
    pub min_delay: Duration,
}

impl FetchOptions {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            headers: Vec::new(),
            encoding: None,
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries.max(1),
            min_delay: Duration::from_millis(config.min_request_delay_ms),
        }
    }

    /// Defaults from the config, overridden by a source's options
    ///
    /// Recognized options: `headers` (table), `encoding`, `timeout_seconds`,
    /// `max_retries` and `request_delay_ms`.
    pub fn for_source(config: &FetchConfig, source: &SourceConfig) -> Self {
        let mut options = Self::from_config(config);

        if let Some(headers) = source.options.get("headers").and_then(Value::as_object) {
            options.headers = headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect();
        }
        if let Some(encoding) = source.option_str("encoding") {
            options.encoding = Some(encoding.to_string());
        }
        if let Some(secs) = source.option_u64("timeout_seconds") {
            options.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(retries) = source.option_u64("max_retries") {
            options.max_retries = (retries as u32).max(1);
        }
        if let Some(ms) = source.option_u64("request_delay_ms") {
            options.min_delay = Duration::from_millis(ms);
        }

        options
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay used as jitter range (0.0-1.0)
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.backoff_initial_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());

        let jitter_range = capped * self.jitter_factor;
        let jittered = if jitter_range > 0.0 {
            capped + rand::random_range(-jitter_range..jitter_range)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Pacing state of one host plus a lock-free request counter
#[derive(Default)]
struct HostEntry {
    pacing: tokio::sync::Mutex<HostState>,
    requests: AtomicU64,
}

/// Rate-limited, retrying HTTP client shared by all crawls
pub struct FetchClient {
    client: Client,
    hosts: Mutex<HashMap<String, Arc<HostEntry>>>,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
    backoff: BackoffPolicy,
    defaults: FetchOptions,
}

impl FetchClient {
    /// Builds a client from the `[fetch]` section
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let user_agents: Vec<String> = config
            .user_agents
            .iter()
            .filter(|ua| !ua.trim().is_empty())
            .cloned()
            .collect();

        Ok(Self {
            client,
            hosts: Mutex::new(HashMap::new()),
            user_agents,
            next_agent: AtomicUsize::new(0),
            backoff: BackoffPolicy::from_config(config),
            defaults: FetchOptions::from_config(config),
        })
    }

    /// Options derived from the `[fetch]` section alone
    pub fn default_options(&self) -> FetchOptions {
        self.defaults.clone()
    }

    /// Fetches `url` and decodes the body as text
    pub async fn fetch_text(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let attempts = options.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(url, options).await {
                Ok(text) => return Ok(text),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) if attempt >= attempts => {
                    tracing::warn!("Giving up on {} after {} attempts: {}", url, attempt, e);
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        url,
                        e,
                        delay
                    );
                    // Backoff sleeps outside the host lock
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fetches `url` and parses the body as JSON
    pub async fn fetch_json(&self, url: &str, options: &FetchOptions) -> Result<Value, FetchError> {
        let options = options.clone().with_header("Accept", "application/json");
        let text = self.fetch_text(url, &options).await?;
        serde_json::from_str(&text).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Number of requests started against `host` so far
    pub fn request_count(&self, host: &str) -> u64 {
        let hosts = match self.hosts.lock() {
            Ok(hosts) => hosts,
            Err(poisoned) => poisoned.into_inner(),
        };
        hosts
            .get(host)
            .map(|entry| entry.requests.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    fn host_entry(&self, key: &str) -> Arc<HostEntry> {
        let mut hosts = match self.hosts.lock() {
            Ok(hosts) => hosts,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(hosts.entry(key.to_string()).or_default())
    }

    fn next_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        Some(self.user_agents[index].as_str())
    }

    /// One paced request, holding the host lock until the response is read
    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
        let key = host_key(&parsed).ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
        let headers = self.build_headers(options)?;

        let host = self.host_entry(&key);
        let mut state = host.pacing.lock().await;

        if let Some(wait) = state.time_until_next_request(options.min_delay, Instant::now()) {
            tracing::trace!("Pacing {} for {:?}", key, wait);
            tokio::time::sleep(wait).await;
        }
        state.record_request(Instant::now());
        host.requests.fetch_add(1, Ordering::SeqCst);

        tracing::debug!("GET {}", url);
        let result = self.send(parsed, headers, options).await;
        if result.is_err() {
            state.record_failure();
        }
        result
    }

    async fn send(
        &self,
        url: Url,
        headers: HeaderMap,
        options: &FetchOptions,
    ) -> Result<String, FetchError> {
        let url_str = url.to_string();
        let response = self
            .client
            .get(url)
            .headers(headers)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| classify(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);
        let bytes = response.bytes().await.map_err(|e| classify(&url_str, e))?;

        let label = options.encoding.clone().or(charset);
        decode_body(&url_str, &bytes, label.as_deref())
    }

    fn build_headers(&self, options: &FetchOptions) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(agent) = self.next_user_agent() {
            if let Ok(value) = HeaderValue::from_str(agent) {
                headers.insert(USER_AGENT, value);
            }
        }
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidUrl(format!("bad header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidUrl(format!("bad header value for '{}': {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Pacing key of a URL: host, plus the port when one is given explicitly
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

fn is_retryable(error: &FetchError) -> bool {
    matches!(
        error,
        FetchError::Http { .. } | FetchError::Network { .. } | FetchError::Timeout { .. }
    )
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn decode_body(url: &str, bytes: &[u8], label: Option<&str>) -> Result<String, FetchError> {
    let encoding = match label {
        Some(label) => encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
            FetchError::Decode {
                url: url.to_string(),
                message: format!("unknown encoding '{}'", label),
            }
        })?,
        None => encoding_rs::UTF_8,
    };
    let (text, _, _) = encoding.decode(bytes);
    Ok(text.into_owned())
}
