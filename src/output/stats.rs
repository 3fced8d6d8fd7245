//! Operator status report
//!
//! This module joins configured sources with their runtime state and recent
//! crawl log entries, and prints the result for `--status`.

use crate::config::SourceConfig;
use crate::crawler::CrawlStatus;
use crate::state::{CrawlLogEntry, CrawlLogStore, CrawlStateStore};
use crate::storage::StorageResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// One source's row in the report
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub name: String,
    pub dimension: String,
    pub schedule: String,
    pub enabled: bool,
    pub last_crawl_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_status: Option<CrawlStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub sources: Vec<SourceStatus>,
    /// Count of sources by their latest status
    pub by_status: HashMap<CrawlStatus, usize>,
    pub never_crawled: usize,
    pub disabled: usize,
    pub recent: Vec<CrawlLogEntry>,
}

/// Builds the report for `sources`, including `recent` log entries
pub fn build_status_report(
    sources: &[SourceConfig],
    state: &CrawlStateStore,
    logs: &CrawlLogStore,
    recent: usize,
) -> StorageResult<StatusReport> {
    let states = state.all()?;

    let mut rows = Vec::with_capacity(sources.len());
    let mut by_status = HashMap::new();
    let mut never_crawled = 0;
    let mut disabled = 0;

    for source in sources {
        let runtime = states.get(&source.id).cloned().unwrap_or_default();
        let enabled = runtime.is_enabled_override.unwrap_or(source.is_enabled);
        let last_status = logs.query(Some(&source.id), 1)?.first().map(|e| e.status);

        match last_status {
            Some(status) => *by_status.entry(status).or_insert(0) += 1,
            None => never_crawled += 1,
        }
        if !enabled {
            disabled += 1;
        }

        rows.push(SourceStatus {
            source_id: source.id.clone(),
            name: source.name.clone(),
            dimension: source.dimension.clone(),
            schedule: source.schedule.to_string(),
            enabled,
            last_crawl_at: runtime.last_crawl_at,
            last_success_at: runtime.last_success_at,
            consecutive_failures: runtime.consecutive_failures,
            last_status,
        });
    }

    // Most troubled sources first
    rows.sort_by(|a, b| {
        b.consecutive_failures
            .cmp(&a.consecutive_failures)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });

    Ok(StatusReport {
        sources: rows,
        by_status,
        never_crawled,
        disabled,
        recent: logs.query(None, recent)?,
    })
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Prints the report to stdout
pub fn print_status_report(report: &StatusReport) {
    println!("=== Source Status ===\n");

    println!("Overview:");
    println!("  Sources: {}", report.sources.len());
    println!("  Disabled: {}", report.disabled);
    println!("  Never crawled: {}", report.never_crawled);
    let mut counts: Vec<_> = report.by_status.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1));
    for (status, count) in counts {
        println!("  {}: {}", status, count);
    }
    println!();

    println!(
        "{:<28} {:<8} {:<8} {:<16} {:<16} {:>5}  {}",
        "SOURCE", "SCHED", "ENABLED", "LAST CRAWL", "LAST SUCCESS", "FAILS", "STATUS"
    );
    for row in &report.sources {
        println!(
            "{:<28} {:<8} {:<8} {:<16} {:<16} {:>5}  {}",
            row.source_id,
            row.schedule,
            if row.enabled { "yes" } else { "no" },
            format_time(row.last_crawl_at),
            format_time(row.last_success_at),
            row.consecutive_failures,
            row.last_status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }

    if !report.recent.is_empty() {
        println!("\nRecent crawls:");
        for entry in &report.recent {
            print!(
                "  {} {:<28} {:<15} {:>4} items, {:>3} new, {:.1}s",
                entry.started_at.format("%Y-%m-%d %H:%M:%S"),
                entry.source_id,
                entry.status.to_string(),
                entry.items_total,
                entry.items_new,
                entry.duration_seconds
            );
            match &entry.error_message {
                Some(message) => println!("  {}", message),
                None => println!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulePreset;
    use crate::storage::{DocumentStore, SqliteStore};
    use serde_json::Map;
    use std::sync::Arc;

    fn source(id: &str, is_enabled: bool) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: id.to_string(),
            url: "https://example.com".to_string(),
            dimension: "policy".to_string(),
            group: None,
            crawl_method: Some("rss".to_string()),
            crawler_class: None,
            schedule: SchedulePreset::FourHourly,
            is_enabled,
            priority: 2,
            options: Map::new(),
        }
    }

    fn entry(source_id: &str, status: CrawlStatus) -> CrawlLogEntry {
        let now = Utc::now();
        CrawlLogEntry {
            source_id: source_id.to_string(),
            status,
            items_total: 0,
            items_new: 0,
            error_message: None,
            started_at: now,
            finished_at: now,
            duration_seconds: 0.5,
            created_at: now,
        }
    }

    #[test]
    fn test_build_status_report() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new_in_memory().unwrap());
        let state = CrawlStateStore::new(Arc::clone(&store));
        let logs = CrawlLogStore::new(store, 10);

        let now = Utc::now();
        state.record_result("a", CrawlStatus::Failed, now).unwrap();
        state.record_result("a", CrawlStatus::Failed, now).unwrap();
        logs.append(&entry("a", CrawlStatus::Failed)).unwrap();
        state.record_result("b", CrawlStatus::Success, now).unwrap();
        logs.append(&entry("b", CrawlStatus::Success)).unwrap();
        state.set_enabled_override("c", Some(false)).unwrap();

        let sources = vec![source("b", true), source("a", true), source("c", true), source("d", false)];
        let report = build_status_report(&sources, &state, &logs, 5).unwrap();

        assert_eq!(report.sources[0].source_id, "a");
        assert_eq!(report.sources[0].consecutive_failures, 2);
        assert_eq!(report.by_status.get(&CrawlStatus::Failed), Some(&1));
        assert_eq!(report.by_status.get(&CrawlStatus::Success), Some(&1));
        assert_eq!(report.never_crawled, 2);
        assert_eq!(report.disabled, 2);
        assert_eq!(report.recent.len(), 2);
        assert_eq!(report.sources[0].schedule, "4h");
    }
}
