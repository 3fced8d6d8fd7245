//! `index.json`: one entry per stored snapshot

use super::{write_atomic, IncrementalSnapshotWriter, OutputResult, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub source_id: String,
    pub source_name: String,
    pub dimension: String,
    pub group: Option<String>,
    pub crawled_at: DateTime<Utc>,
    pub item_count: usize,
    pub new_item_count: usize,
    /// Snapshot path relative to the snapshot directory
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotIndex {
    pub generated_at: DateTime<Utc>,
    pub total_items: usize,
    pub total_new_items: usize,
    /// Number of sources per dimension
    pub dimensions: BTreeMap<String, usize>,
    pub sources: Vec<IndexEntry>,
}

pub fn build_index(snapshots: &[Snapshot], generated_at: DateTime<Utc>) -> SnapshotIndex {
    let mut dimensions = BTreeMap::new();
    let sources: Vec<IndexEntry> = snapshots
        .iter()
        .map(|s| {
            *dimensions.entry(s.dimension.clone()).or_insert(0) += 1;
            IndexEntry {
                source_id: s.source_id.clone(),
                source_name: s.source_name.clone(),
                dimension: s.dimension.clone(),
                group: s.group.clone(),
                crawled_at: s.crawled_at,
                item_count: s.item_count,
                new_item_count: s.new_item_count,
                path: format!("{}/{}.json", s.dimension, s.source_id),
            }
        })
        .collect();

    SnapshotIndex {
        generated_at,
        total_items: sources.iter().map(|e| e.item_count).sum(),
        total_new_items: sources.iter().map(|e| e.new_item_count).sum(),
        dimensions,
        sources,
    }
}

/// Indexes every snapshot under `writer` and writes the result to `path`
pub fn write_index(writer: &IncrementalSnapshotWriter, path: &Path) -> OutputResult<SnapshotIndex> {
    let index = build_index(&writer.all()?, Utc::now());
    let mut json = serde_json::to_vec_pretty(&index)?;
    json.push(b'\n');
    write_atomic(path, &json)?;

    tracing::info!(
        "Indexed {} snapshots ({} items) into {}",
        index.sources.len(),
        index.total_items,
        path.display()
    );
    Ok(index)
}
