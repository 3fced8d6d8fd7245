//! Capped per-source history of crawl outcomes

use crate::crawler::{CrawlResult, CrawlStatus};
use crate::storage::{DocumentStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const LOG_PREFIX: &str = "logs";

/// Projection of one CrawlResult kept in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlLogEntry {
    pub source_id: String,
    pub status: CrawlStatus,
    pub items_total: usize,
    pub items_new: usize,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&CrawlResult> for CrawlLogEntry {
    fn from(result: &CrawlResult) -> Self {
        Self {
            source_id: result.source_id.clone(),
            status: result.status,
            items_total: result.items_total,
            items_new: result.items_new,
            error_message: result.error_message.clone(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            duration_seconds: result.duration_seconds,
            created_at: Utc::now(),
        }
    }
}

pub struct CrawlLogStore {
    store: Arc<dyn DocumentStore>,
    cap: usize,
}

impl CrawlLogStore {
    pub fn new(store: Arc<dyn DocumentStore>, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
        }
    }

    fn key(source_id: &str) -> String {
        format!("{}/{}", LOG_PREFIX, source_id)
    }

    /// Appends an entry, evicting the oldest beyond the cap
    pub fn append(&self, entry: &CrawlLogEntry) -> StorageResult<()> {
        self.store.append_capped(
            &Self::key(&entry.source_id),
            &serde_json::to_value(entry)?,
            self.cap,
        )
    }

    /// Most recent entries first
    ///
    /// With no `source_id`, entries of every source are merged before the
    /// limit is applied.
    pub fn query(&self, source_id: Option<&str>, limit: usize) -> StorageResult<Vec<CrawlLogEntry>> {
        let keys = match source_id {
            Some(id) => vec![Self::key(id)],
            None => self.store.keys(LOG_PREFIX)?,
        };

        let mut entries = Vec::new();
        for key in keys {
            for value in self.store.list(&key)? {
                match serde_json::from_value::<CrawlLogEntry>(value) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => tracing::warn!("Skipping unreadable log entry in {}: {}", key, e),
                }
            }
        }

        entries.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonFileStore, SqliteStore};
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry(source_id: &str, minutes_ago: i64, status: CrawlStatus) -> CrawlLogEntry {
        let started_at = Utc::now() - Duration::minutes(minutes_ago);
        CrawlLogEntry {
            source_id: source_id.to_string(),
            status,
            items_total: 3,
            items_new: 1,
            error_message: None,
            started_at,
            finished_at: started_at + Duration::seconds(2),
            duration_seconds: 2.0,
            created_at: started_at,
        }
    }

    fn exercise(store: Arc<dyn DocumentStore>) {
        let log = CrawlLogStore::new(store, 3);
        for i in (0..5).rev() {
            log.append(&entry("a", i * 10, CrawlStatus::Success)).unwrap();
        }
        log.append(&entry("b", 5, CrawlStatus::Failed)).unwrap();

        // Cap of three per source
        let a = log.query(Some("a"), 10).unwrap();
        assert_eq!(a.len(), 3);
        assert!(a.windows(2).all(|w| w[0].started_at >= w[1].started_at));

        let merged = log.query(None, 10).unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].source_id, "a");
        assert_eq!(merged[1].source_id, "b");

        assert_eq!(log.query(None, 2).unwrap().len(), 2);
        assert!(log.query(Some("missing"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_log_on_json_files() {
        let dir = TempDir::new().unwrap();
        exercise(Arc::new(JsonFileStore::open(dir.path()).unwrap()));
    }

    #[test]
    fn test_log_on_sqlite() {
        let dir = TempDir::new().unwrap();
        exercise(Arc::new(SqliteStore::new(&dir.path().join("t.db")).unwrap()));
    }
}
