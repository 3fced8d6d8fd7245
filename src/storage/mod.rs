//! Storage module for persisting crawl bookkeeping
//!
//! This module provides the document-store abstraction and its backends:
//! - `JsonFileStore`: one JSON file per key, atomic overwrite
//! - `SqliteStore`: embedded SQLite database
//!
//! Runtime state and crawl logs live in the backend chosen by
//! `[storage] backend`. Snapshots are always plain JSON files because
//! downstream consumers read them directly.

mod json_file;
mod schema;
mod sqlite;
mod traits;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;
pub use traits::{DocumentStore, StorageError, StorageResult};

use crate::config::{StorageBackend, StorageConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory holding per-source snapshot files
pub fn snapshot_dir(config: &StorageConfig) -> PathBuf {
    Path::new(&config.data_dir).join("raw")
}

/// Opens the state/log store selected by the configuration
pub fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn DocumentStore>> {
    let data_dir = Path::new(&config.data_dir);
    let store: Arc<dyn DocumentStore> = match config.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::open(data_dir.join("state"))?),
        StorageBackend::Sqlite => Arc::new(SqliteStore::new(&data_dir.join("tidewatch.db"))?),
    };
    tracing::debug!(
        "Opened {:?} store under {}",
        config.backend,
        data_dir.display()
    );
    Ok(store)
}
