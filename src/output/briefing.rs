//! Markdown briefing of newly seen items
//!
//! The briefing groups every `is_new` item across all snapshots by
//! dimension, newest first, and lists sources that produced nothing new.

use super::{write_atomic, OutputResult, Snapshot, SnapshotItem};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ITEMS_PER_DIMENSION: usize = 30;
const SUMMARY_CHARS: usize = 200;

fn summary(item: &SnapshotItem) -> Option<String> {
    let content = item.item.content.as_deref()?.trim();
    if content.is_empty() {
        return None;
    }
    let mut text: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SUMMARY_CHARS)
        .collect();
    if content.chars().count() > SUMMARY_CHARS {
        text.push('…');
    }
    Some(text)
}

/// Formats the briefing for `snapshots`
pub fn format_briefing(snapshots: &[Snapshot], generated_at: DateTime<Utc>) -> String {
    let mut by_dimension: BTreeMap<&str, Vec<(&Snapshot, &SnapshotItem)>> = BTreeMap::new();
    let mut quiet = Vec::new();

    for snapshot in snapshots {
        let mut any = false;
        for item in snapshot.new_items() {
            any = true;
            by_dimension
                .entry(snapshot.dimension.as_str())
                .or_default()
                .push((snapshot, item));
        }
        if !any {
            quiet.push(snapshot);
        }
    }

    let total: usize = by_dimension.values().map(Vec::len).sum();

    let mut md = String::new();
    md.push_str(&format!("# Briefing {}\n\n", generated_at.format("%Y-%m-%d")));
    md.push_str(&format!(
        "- **Generated**: {}\n",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    ));
    md.push_str(&format!("- **Sources**: {}\n", snapshots.len()));
    md.push_str(&format!("- **New items**: {}\n\n", total));

    if total == 0 {
        md.push_str("No new items.\n");
    }

    for (dimension, mut entries) in by_dimension {
        entries.sort_by(|a, b| b.1.item.published_at.cmp(&a.1.item.published_at));

        md.push_str(&format!("## {} ({})\n\n", dimension, entries.len()));
        for (snapshot, item) in entries.iter().take(ITEMS_PER_DIMENSION) {
            md.push_str(&format!("- [{}]({})", item.item.title, item.item.url));
            md.push_str(&format!(" · {}", snapshot.source_name));
            if let Some(published) = item.item.published_at {
                md.push_str(&format!(" · {}", published.format("%Y-%m-%d")));
            }
            md.push('\n');
            if let Some(text) = summary(item) {
                md.push_str(&format!("  > {}\n", text));
            }
        }
        if entries.len() > ITEMS_PER_DIMENSION {
            md.push_str(&format!(
                "- … and {} more\n",
                entries.len() - ITEMS_PER_DIMENSION
            ));
        }
        md.push('\n');
    }

    if !quiet.is_empty() {
        md.push_str("## Sources without new items\n\n");
        for snapshot in quiet {
            md.push_str(&format!(
                "- {} (last crawled {})\n",
                snapshot.source_name,
                snapshot.crawled_at.format("%Y-%m-%d %H:%M")
            ));
        }
    }

    md
}

/// Writes `briefing-YYYY-MM-DD.md` under `dir` and returns its path
pub fn write_briefing(
    dir: &Path,
    snapshots: &[Snapshot],
    generated_at: DateTime<Utc>,
) -> OutputResult<PathBuf> {
    let path = dir.join(format!("briefing-{}.md", generated_at.format("%Y-%m-%d")));
    write_atomic(&path, format_briefing(snapshots, generated_at).as_bytes())?;
    tracing::info!("Wrote briefing to {}", path.display());
    Ok(path)
}
