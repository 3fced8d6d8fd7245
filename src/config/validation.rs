use crate::config::types::{
    BrowserConfig, Config, FetchConfig, PipelineConfig, SchedulerConfig, SourceConfig,
    StorageConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_fetch_config(&config.fetch)?;
    validate_browser_config(&config.browser)?;
    validate_storage_config(&config.storage)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_sources(&config.sources)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if !(-12..=14).contains(&config.utc_offset_hours) {
        return Err(ConfigError::Validation(format!(
            "utc-offset-hours must be between -12 and 14, got {}",
            config.utc_offset_hours
        )));
    }

    if config.daily_hour > 23 {
        return Err(ConfigError::Validation(format!(
            "daily-hour must be between 0 and 23, got {}",
            config.daily_hour
        )));
    }

    if !(1..=7).contains(&config.weekly_weekday) {
        return Err(ConfigError::Validation(format!(
            "weekly-weekday must be between 1 (Monday) and 7 (Sunday), got {}",
            config.weekly_weekday
        )));
    }

    // Days past the 28th do not exist in every month
    if !(1..=28).contains(&config.monthly_day) {
        return Err(ConfigError::Validation(format!(
            "monthly-day must be between 1 and 28, got {}",
            config.monthly_day
        )));
    }

    if config.crawl_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "crawl-timeout-seconds must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "fetch timeout-seconds must be >= 1".to_string(),
        ));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if config.backoff_max_ms < config.backoff_initial_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-max-ms ({}) must be >= backoff-initial-ms ({})",
            config.backoff_max_ms, config.backoff_initial_ms
        )));
    }

    if config.user_agents.iter().all(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents must contain at least one non-empty entry".to_string(),
        ));
    }

    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 || config.max_pages > 32 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be between 1 and 32, got {}",
            config.max_pages
        )));
    }

    if config.page_timeout_seconds == 0 || config.acquire_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "browser timeouts must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data-dir cannot be empty".to_string(),
        ));
    }

    if config.log_cap < 1 {
        return Err(ConfigError::Validation(
            "log-cap must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.hour > 23 || config.minute > 59 {
        return Err(ConfigError::Validation(format!(
            "pipeline time {:02}:{:02} is not a valid time of day",
            config.hour, config.minute
        )));
    }

    if config.browser_concurrency < 1 || config.default_concurrency < 1 {
        return Err(ConfigError::Validation(
            "pipeline concurrency caps must be >= 1".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for stage in &config.stages {
        if stage.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "pipeline stage name cannot be empty".to_string(),
            ));
        }
        if !names.insert(stage.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate pipeline stage '{}'",
                stage.name
            )));
        }
        if let Some(endpoint) = &stage.endpoint {
            Url::parse(endpoint).map_err(|e| {
                ConfigError::InvalidUrl(format!(
                    "stage '{}' endpoint '{}': {}",
                    stage.name, endpoint, e
                ))
            })?;
        }
    }

    Ok(())
}

/// Validates source descriptors
///
/// Strategy keys are not checked here; an unknown key only fails when the
/// crawler for that source is created.
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();

    for source in sources {
        if source.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source id cannot be empty".to_string(),
            ));
        }

        if !ids.insert(source.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source id '{}'",
                source.id
            )));
        }

        if source.dimension.trim().is_empty() {
            return Err(ConfigError::InvalidOption {
                source_id: source.id.clone(),
                option: "dimension".to_string(),
                message: "dimension cannot be empty".to_string(),
            });
        }
        for (option, value) in [("id", &source.id), ("dimension", &source.dimension)] {
            if let Some(problem) = key_segment_problem(value) {
                return Err(ConfigError::InvalidOption {
                    source_id: source.id.clone(),
                    option: option.to_string(),
                    message: format!("'{}' {}", value, problem),
                });
            }
        }

        validate_source_url(source)?;

        match (&source.crawl_method, &source.crawler_class) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(format!(
                    "source '{}' sets both crawl_method and crawler_class",
                    source.id
                )));
            }
            (None, None) => return Err(ConfigError::MissingStrategy(source.id.clone())),
            _ => {}
        }

        if let Some(headers) = source.options.get("headers") {
            if !headers.is_object() {
                return Err(ConfigError::InvalidOption {
                    source_id: source.id.clone(),
                    option: "headers".to_string(),
                    message: "expected a table of header names to values".to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Ids and dimensions name storage keys and files
fn key_segment_problem(value: &str) -> Option<&'static str> {
    if value.contains('/') || value.contains('\\') {
        Some("must not contain path separators")
    } else if value.contains("..") {
        Some("must not contain '..'")
    } else if value.chars().any(char::is_whitespace) {
        Some("must not contain whitespace")
    } else {
        None
    }
}

fn validate_source_url(source: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&source.url).map_err(|e| {
        ConfigError::InvalidUrl(format!("source '{}' url '{}': {}", source.id, source.url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "source '{}' url '{}' must use http or https",
            source.id, source.url
        )));
    }

    Ok(())
}
