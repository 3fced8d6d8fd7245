//! Output module for snapshots, indexes and reports
//!
//! This module handles:
//! - Per-source snapshot files (the dedup baseline and primary output)
//! - The `index.json` listing of every snapshot
//! - Markdown briefings of newly seen items
//! - The operator status report

mod briefing;
mod index;
mod snapshot;
pub mod stats;

pub use briefing::{format_briefing, write_briefing};
pub use index::{build_index, write_index, IndexEntry, SnapshotIndex};
pub use snapshot::{Baseline, IncrementalSnapshotWriter, Snapshot, SnapshotItem};
pub use stats::{build_status_report, print_status_report, SourceStatus, StatusReport};

use crate::storage::StorageError;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Replaces `path` with `contents` via a temp file in the same directory
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> OutputResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| OutputError::Write(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| OutputError::Io(e.error))?;
    Ok(())
}
