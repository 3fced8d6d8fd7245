//! Per-source snapshot files
//!
//! Each source's latest batch lives at `raw/<dimension>/<source_id>.json`.
//! The file is both the durable output read by consumers and the dedup
//! baseline for the next crawl of that source.

use crate::config::SourceConfig;
use crate::crawler::{CrawlResult, CrawledItem};
use crate::dedup::{count_new, mark_new};
use crate::storage::{DocumentStore, JsonFileStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A crawled item as stored in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotItem {
    #[serde(flatten)]
    pub item: CrawledItem,
    pub url_hash: String,
    pub is_new: bool,
}

/// The stored batch for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_id: String,
    pub dimension: String,
    pub group: Option<String>,
    pub source_name: String,
    pub crawled_at: DateTime<Utc>,
    pub previous_crawled_at: Option<DateTime<Utc>>,
    pub item_count: usize,
    pub new_item_count: usize,
    pub items: Vec<SnapshotItem>,
}

impl Snapshot {
    pub fn new_items(&self) -> impl Iterator<Item = &SnapshotItem> {
        self.items.iter().filter(|i| i.is_new)
    }
}

/// What the previous snapshot says about a source
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub url_hashes: HashSet<String>,
    pub crawled_at: Option<DateTime<Utc>>,
}

pub struct IncrementalSnapshotWriter {
    store: JsonFileStore,
}

fn snapshot_key(dimension: &str, source_id: &str) -> String {
    format!("{}/{}", dimension, source_id)
}

impl IncrementalSnapshotWriter {
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Ok(Self {
            store: JsonFileStore::open(dir)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Reads the stored snapshot of a source, if any
    pub fn load(&self, source: &SourceConfig) -> StorageResult<Option<Snapshot>> {
        match self.store.get(&snapshot_key(&source.dimension, &source.id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// URL hashes and timestamp of the previous snapshot
    pub fn baseline(&self, source: &SourceConfig) -> StorageResult<Baseline> {
        Ok(match self.load(source)? {
            Some(snapshot) => Baseline {
                url_hashes: snapshot.items.into_iter().map(|i| i.url_hash).collect(),
                crawled_at: Some(snapshot.crawled_at),
            },
            None => Baseline::default(),
        })
    }

    /// Annotates the batch against `baseline` and replaces the snapshot
    ///
    /// Failed or empty crawls leave the previous snapshot untouched and
    /// return `None`.
    pub fn write(
        &self,
        result: &CrawlResult,
        source: &SourceConfig,
        baseline: &Baseline,
    ) -> StorageResult<Option<Snapshot>> {
        if result.is_failed() || result.items.is_empty() {
            tracing::debug!(
                source_id = %source.id,
                "Keeping previous snapshot ({})",
                result.status
            );
            return Ok(None);
        }

        let marked = mark_new(&result.items, &baseline.url_hashes);
        let new_item_count = count_new(&marked);
        let items = marked
            .into_iter()
            .map(|m| SnapshotItem {
                item: m.item.clone(),
                url_hash: m.url_hash,
                is_new: m.is_new,
            })
            .collect::<Vec<_>>();

        let snapshot = Snapshot {
            source_id: source.id.clone(),
            dimension: source.dimension.clone(),
            group: source.group.clone(),
            source_name: source.name.clone(),
            crawled_at: result.finished_at,
            previous_crawled_at: baseline.crawled_at,
            item_count: items.len(),
            new_item_count,
            items,
        };

        self.store.put(
            &snapshot_key(&source.dimension, &source.id),
            &serde_json::to_value(&snapshot)?,
        )?;
        tracing::debug!(
            source_id = %source.id,
            "Wrote snapshot with {} items ({} new)",
            snapshot.item_count,
            snapshot.new_item_count
        );
        Ok(Some(snapshot))
    }

    /// Every stored snapshot, ordered by key
    pub fn all(&self) -> StorageResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for key in self.store.keys("")? {
            match self.store.get(&key)? {
                Some(value) => match serde_json::from_value(value) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => tracing::warn!("Skipping unreadable snapshot {}: {}", key, e),
                },
                None => continue,
            }
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulePreset;
    use crate::crawler::CrawlStatus;
    use serde_json::Map;
    use tempfile::TempDir;

    fn source() -> SourceConfig {
        SourceConfig {
            id: "gov-news".to_string(),
            name: "Gov News".to_string(),
            url: "https://gov.example/news".to_string(),
            dimension: "policy".to_string(),
            group: Some("central".to_string()),
            crawl_method: Some("static_html".to_string()),
            crawler_class: None,
            schedule: SchedulePreset::Daily,
            is_enabled: true,
            priority: 1,
            options: Map::new(),
        }
    }

    fn result(urls: &[&str], status: CrawlStatus) -> CrawlResult {
        let items: Vec<CrawledItem> = urls
            .iter()
            .map(|u| CrawledItem::new("t", *u, "gov-news", "policy"))
            .collect();
        let now = Utc::now();
        CrawlResult {
            source_id: "gov-news".to_string(),
            status,
            items_total: items.len(),
            items_new: 0,
            items,
            error_message: None,
            started_at: now,
            finished_at: now,
            duration_seconds: 0.1,
        }
    }

    #[test]
    fn test_second_write_marks_only_unseen_urls() {
        let dir = TempDir::new().unwrap();
        let writer = IncrementalSnapshotWriter::open(dir.path()).unwrap();
        let src = source();

        let baseline = writer.baseline(&src).unwrap();
        assert!(baseline.url_hashes.is_empty());
        let first = writer
            .write(&result(&["https://gov.example/a", "https://gov.example/b"], CrawlStatus::Success), &src, &baseline)
            .unwrap()
            .unwrap();
        assert_eq!(first.new_item_count, 2);
        assert!(first.previous_crawled_at.is_none());
        assert!(dir.path().join("policy").join("gov-news.json").exists());

        let baseline = writer.baseline(&src).unwrap();
        assert_eq!(baseline.crawled_at, Some(first.crawled_at));
        let second = writer
            .write(&result(&["https://gov.example/b/", "https://gov.example/c"], CrawlStatus::Success), &src, &baseline)
            .unwrap()
            .unwrap();
        assert_eq!(second.item_count, 2);
        assert_eq!(second.new_item_count, 1);
        assert!(!second.items[0].is_new);
        assert!(second.items[1].is_new);
        assert_eq!(second.previous_crawled_at, Some(first.crawled_at));
    }

    #[test]
    fn test_failed_or_empty_keeps_snapshot() {
        let dir = TempDir::new().unwrap();
        let writer = IncrementalSnapshotWriter::open(dir.path()).unwrap();
        let src = source();

        writer
            .write(&result(&["https://gov.example/a"], CrawlStatus::Success), &src, &Baseline::default())
            .unwrap();
        let baseline = writer.baseline(&src).unwrap();

        assert!(writer.write(&result(&[], CrawlStatus::Failed), &src, &baseline).unwrap().is_none());
        assert!(writer.write(&result(&[], CrawlStatus::NoNewContent), &src, &baseline).unwrap().is_none());
        assert_eq!(writer.baseline(&src).unwrap().url_hashes, baseline.url_hashes);
    }

    #[test]
    fn test_snapshot_shape() {
        let dir = TempDir::new().unwrap();
        let writer = IncrementalSnapshotWriter::open(dir.path()).unwrap();
        let snapshot = writer
            .write(&result(&["https://gov.example/a"], CrawlStatus::Success), &source(), &Baseline::default())
            .unwrap()
            .unwrap();

        let value = serde_json::to_value(&snapshot).unwrap();
        for field in ["source_id", "dimension", "group", "source_name", "crawled_at", "previous_crawled_at", "item_count", "new_item_count"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        let item = &value["items"][0];
        assert_eq!(item["url"], "https://gov.example/a");
        assert_eq!(item["url_hash"], crate::dedup::url_hash("https://gov.example/a"));
        assert_eq!(item["is_new"], true);
        assert!(item.get("extra").is_some());
    }

    #[test]
    fn test_dotted_source_ids_have_separate_baselines() {
        let dir = TempDir::new().unwrap();
        let writer = IncrementalSnapshotWriter::open(dir.path()).unwrap();
        let mut gov = source();
        gov.id = "moe.gov".to_string();
        let mut edu = source();
        edu.id = "moe.edu".to_string();

        writer
            .write(&result(&["https://gov.example/a"], CrawlStatus::Success), &gov, &Baseline::default())
            .unwrap();

        assert!(writer.baseline(&edu).unwrap().url_hashes.is_empty());
        assert!(writer.load(&edu).unwrap().is_none());
        assert_eq!(writer.load(&gov).unwrap().unwrap().source_id, "moe.gov");
    }

    #[test]
    fn test_all_lists_every_source() {
        let dir = TempDir::new().unwrap();
        let writer = IncrementalSnapshotWriter::open(dir.path()).unwrap();
        let mut other = source();
        other.id = "tech-blog".to_string();
        other.dimension = "technology".to_string();

        writer.write(&result(&["https://gov.example/a"], CrawlStatus::Success), &source(), &Baseline::default()).unwrap();
        writer.write(&result(&["https://blog.example/1"], CrawlStatus::Success), &other, &Baseline::default()).unwrap();

        let all = writer.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_id, "gov-news");
        assert_eq!(all[1].source_id, "tech-blog");
    }
}
