use crate::config::types::{Config, SourceConfig};
use crate::config::validation::validate;
use crate::ConfigError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Shape of a file inside `sources-dir`
#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(rename = "source", default)]
    sources: Vec<SourceConfig>,
}

/// Loads and parses a configuration file from the given path
///
/// Sources declared in `sources-dir` are appended after the inline
/// `[[source]]` tables, reading the directory's `*.toml` files in name order.
/// A relative `sources-dir` is resolved against the config file's directory.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use tidewatch::config::load_config;
///
/// let config = load_config(Path::new("tidewatch.toml")).unwrap();
/// println!("Loaded {} sources", config.sources.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;

    if let Some(dir) = config.sources_dir.clone() {
        let dir = resolve_relative(path, &dir);
        let extra = load_sources_dir(&dir)?;
        tracing::debug!(
            "Loaded {} sources from {}",
            extra.len(),
            dir.display()
        );
        config.sources.extend(extra);
    }

    validate(&config)?;

    Ok(config)
}

/// Reads every `*.toml` file of a directory as a list of `[[source]]` tables
pub fn load_sources_dir(dir: &Path) -> Result<Vec<SourceConfig>, ConfigError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();

    let mut sources = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        let parsed: SourcesFile = toml::from_str(&content)?;
        sources.extend(parsed.sources);
    }
    Ok(sources)
}

fn resolve_relative(config_path: &Path, dir: &str) -> PathBuf {
    let dir = Path::new(dir);
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    match config_path.parent() {
        Some(parent) => parent.join(dir),
        None => dir.to_path_buf(),
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so operators can tell which configuration a run used.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
