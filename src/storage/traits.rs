//! Storage traits and error types
//!
//! This module defines the narrow document-store interface shared by the
//! runtime state, crawl log and snapshot layers.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Document '{key}' is not a JSON array")]
    NotAList { key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value document store
///
/// Keys are `/`-separated paths such as `logs/gov-news`. Implementations
/// must make `put` atomic (readers see the old or the new document, never a
/// mix) and keep at most `cap` entries per list in `append_capped`.
pub trait DocumentStore: Send + Sync {
    /// Reads a document, `None` if the key was never written
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Atomically replaces a document
    fn put(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Appends to a list document, dropping the oldest entries beyond `cap`
    fn append_capped(&self, key: &str, entry: &Value, cap: usize) -> StorageResult<()>;

    /// Reads a list document in append order, empty if never written
    fn list(&self, key: &str) -> StorageResult<Vec<Value>>;

    /// Enumerates keys below `prefix` (all keys for an empty prefix)
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Rejects keys that could escape the store root
pub(crate) fn check_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Whether `key` lies below `prefix`
pub(crate) fn key_under(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
