//! Configuration module for Tidewatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use tidewatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tidewatch.toml")).unwrap();
//! println!("Fetch timeout: {}s", config.fetch.timeout_seconds);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, Config, FetchConfig, HookStageConfig, PipelineConfig, SchedulePreset,
    SchedulerConfig, SourceConfig, StorageBackend, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, load_sources_dir};
