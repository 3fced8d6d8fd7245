use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Main configuration structure for Tidewatch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Directory of additional `*.toml` files holding `[[source]]` tables
    #[serde(rename = "sources-dir", default)]
    pub sources_dir: Option<String>,

    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

/// Trigger timing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound of the random delay added to every firing (seconds)
    #[serde(rename = "jitter-seconds")]
    pub jitter_seconds: u64,

    /// Offset of the wall clock used for daily/weekly/monthly presets
    #[serde(rename = "utc-offset-hours")]
    pub utc_offset_hours: i32,

    /// Hour of day at which `daily`, `weekly` and `monthly` sources fire
    #[serde(rename = "daily-hour")]
    pub daily_hour: u32,

    /// ISO weekday (1 = Monday) for `weekly` sources
    #[serde(rename = "weekly-weekday")]
    pub weekly_weekday: u32,

    /// Day of month (1..=28) for `monthly` sources
    #[serde(rename = "monthly-day")]
    pub monthly_day: u32,

    /// Upper bound for a single source crawl
    #[serde(rename = "crawl-timeout-seconds")]
    pub crawl_timeout_seconds: u64,

    /// How long shutdown waits for in-flight crawls
    #[serde(rename = "shutdown-grace-seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jitter_seconds: 120,
            utc_offset_hours: 0,
            daily_hour: 6,
            weekly_weekday: 1,
            monthly_day: 1,
            crawl_timeout_seconds: 600,
            shutdown_grace_seconds: 30,
        }
    }
}

/// HTTP fetch behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    #[serde(rename = "timeout-seconds")]
    pub timeout_seconds: u64,

    /// Total number of attempts per request
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Minimum time between two requests to the same host (milliseconds)
    #[serde(rename = "min-request-delay-ms")]
    pub min_request_delay_ms: u64,

    #[serde(rename = "backoff-initial-ms")]
    pub backoff_initial_ms: u64,

    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,

    /// Pool of browser identification strings rotated per request
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 3,
            min_request_delay_ms: 1000,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30_000,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Headless browser pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Maximum number of pages open at the same time
    #[serde(rename = "max-pages")]
    pub max_pages: usize,

    #[serde(rename = "page-timeout-seconds")]
    pub page_timeout_seconds: u64,

    /// Upper bound for waiting on a free page slot
    #[serde(rename = "acquire-timeout-seconds")]
    pub acquire_timeout_seconds: u64,

    pub headless: bool,

    #[serde(rename = "chrome-executable")]
    pub chrome_executable: Option<String>,

    pub locale: String,

    #[serde(rename = "viewport-width")]
    pub viewport_width: u32,

    #[serde(rename = "viewport-height")]
    pub viewport_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_pages: 3,
            page_timeout_seconds: 45,
            acquire_timeout_seconds: 600,
            headless: true,
            chrome_executable: None,
            locale: "zh-CN".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        }
    }
}

/// Which document store keeps runtime state and crawl logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Root directory for snapshots, state, logs and generated outputs
    #[serde(rename = "data-dir")]
    pub data_dir: String,

    /// Number of crawl log entries kept per source
    #[serde(rename = "log-cap")]
    pub log_cap: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            data_dir: "./data".to_string(),
            log_cap: 100,
        }
    }
}

/// Daily pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,

    /// Concurrent crawls allowed for browser-rendered sources
    #[serde(rename = "browser-concurrency")]
    pub browser_concurrency: usize,

    /// Concurrent crawls allowed for all other sources
    #[serde(rename = "default-concurrency")]
    pub default_concurrency: usize,

    /// External processing stages run after the crawl, in order
    #[serde(rename = "stage")]
    pub stages: Vec<HookStageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 7,
            minute: 0,
            browser_concurrency: 2,
            default_concurrency: 8,
            stages: Vec::new(),
        }
    }
}

/// An external processing stage reached over HTTP
#[derive(Debug, Clone, Deserialize)]
pub struct HookStageConfig {
    pub name: String,

    /// Endpoint to POST to
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the endpoint, used when `endpoint` is unset
    #[serde(rename = "endpoint-env", default)]
    pub endpoint_env: Option<String>,

    #[serde(rename = "timeout-seconds", default = "default_hook_timeout")]
    pub timeout_seconds: u64,
}

fn default_hook_timeout() -> u64 {
    300
}

impl HookStageConfig {
    /// Resolves the endpoint from the config or the environment
    pub fn resolve_endpoint(&self) -> Option<String> {
        self.endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| {
                self.endpoint_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|e| !e.trim().is_empty())
            })
    }
}

/// Recurrence presets a source can be scheduled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SchedulePreset {
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "2h")]
    TwoHourly,
    #[serde(rename = "4h")]
    FourHourly,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl SchedulePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::TwoHourly => "2h",
            Self::FourHourly => "4h",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for SchedulePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of one crawled source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub dimension: String,

    /// Optional sub-grouping inside a dimension
    #[serde(default)]
    pub group: Option<String>,

    /// Built-in strategy key
    #[serde(default)]
    pub crawl_method: Option<String>,

    /// Custom strategy identifier
    #[serde(default)]
    pub crawler_class: Option<String>,

    pub schedule: SchedulePreset,

    #[serde(default = "default_true")]
    pub is_enabled: bool,

    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Strategy-specific options (headers, encoding, selectors, delays)
    #[serde(default)]
    pub options: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    2
}

impl SourceConfig {
    /// Returns a string option
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Returns an unsigned integer option
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    /// Returns a boolean option
    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }

    /// The strategy key this source resolves through, for logging
    pub fn strategy_key(&self) -> &str {
        self.crawler_class
            .as_deref()
            .or(self.crawl_method.as_deref())
            .unwrap_or("<none>")
    }
}
