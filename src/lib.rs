//! Tidewatch: a scheduled multi-source crawl orchestrator
//!
//! This crate keeps one recurring crawl job per configured source, fetches
//! through a paced and retrying HTTP client or a bounded headless-browser
//! pool, deduplicates results against the previous run, persists them
//! incrementally and drives a daily multi-stage processing pipeline.

pub mod app;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod output;
pub mod pipeline;
pub mod scheduler;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Tidewatch operations
#[derive(Debug, Error)]
pub enum TideError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Source '{source_id}' uses unknown crawl strategy '{key}'")]
    UnknownStrategy { source_id: String, key: String },

    #[error("Source '{0}' sets neither crawl_method nor crawler_class")]
    MissingStrategy(String),

    #[error("Source '{source_id}' has an invalid option '{option}': {message}")]
    InvalidOption {
        source_id: String,
        option: String,
        message: String,
    },
}

/// Network fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

/// Errors raised by crawl strategies
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Crawl timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Crawler panicked: {0}")]
    Panicked(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Tidewatch operations
pub type Result<T> = std::result::Result<T, TideError>;

// Re-export commonly used types
pub use app::{AppContext, TriggerOutcome};
pub use config::{Config, SourceConfig};
pub use crawler::{CrawlResult, CrawlStatus, CrawledItem};
pub use dedup::{content_hash, normalize_url, url_hash};
pub use pipeline::{PipelineResult, PipelineRunner};
