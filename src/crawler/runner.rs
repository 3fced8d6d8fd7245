//! One crawl of one source, end to end
//!
//! Scheduled firings, manual triggers and the pipeline's crawl stage all go
//! through [`SourceRunner::run`], so a source is never crawled twice at once
//! no matter who asked.

use super::{CrawlResult, CrawlerFactory};
use crate::config::SourceConfig;
use crate::output::{Baseline, IncrementalSnapshotWriter};
use crate::state::{CrawlLogEntry, CrawlLogStore, CrawlStateStore};
use crate::ConfigError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Result of asking the runner to crawl a source
#[derive(Debug)]
pub enum RunOutcome {
    Completed(CrawlResult),
    /// Another crawl of the same source was still in flight
    AlreadyRunning,
    /// The source's strategy could not be built; nothing was fetched
    Misconfigured(ConfigError),
}

impl RunOutcome {
    pub fn result(&self) -> Option<&CrawlResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }
}

pub struct SourceRunner {
    factory: CrawlerFactory,
    snapshots: IncrementalSnapshotWriter,
    logs: CrawlLogStore,
    state: Arc<CrawlStateStore>,
    running: Mutex<HashSet<String>>,
}

/// Marks a source as in flight until dropped
struct RunClaim<'a> {
    running: &'a Mutex<HashSet<String>>,
    source_id: String,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.source_id);
    }
}

impl SourceRunner {
    pub fn new(
        factory: CrawlerFactory,
        snapshots: IncrementalSnapshotWriter,
        logs: CrawlLogStore,
        state: Arc<CrawlStateStore>,
    ) -> Self {
        Self {
            factory,
            snapshots,
            logs,
            state,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn factory(&self) -> &CrawlerFactory {
        &self.factory
    }

    pub fn snapshots(&self) -> &IncrementalSnapshotWriter {
        &self.snapshots
    }

    pub fn logs(&self) -> &CrawlLogStore {
        &self.logs
    }

    pub fn state(&self) -> &Arc<CrawlStateStore> {
        &self.state
    }

    pub fn is_running(&self, source_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(source_id)
    }

    /// Number of crawls currently in flight
    pub fn in_flight(&self) -> usize {
        self.running.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn claim(&self, source_id: &str) -> Option<RunClaim<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(source_id.to_string()) {
            return None;
        }
        Some(RunClaim {
            running: &self.running,
            source_id: source_id.to_string(),
        })
    }

    /// Crawls `source` unless it is already being crawled
    ///
    /// The result is folded into the snapshot, the crawl log and the runtime
    /// state before returning. Bookkeeping faults are logged, never raised.
    pub async fn run(&self, source: &SourceConfig) -> RunOutcome {
        let Some(_claim) = self.claim(&source.id) else {
            tracing::info!(source_id = %source.id, "Crawl already in flight; skipping");
            return RunOutcome::AlreadyRunning;
        };

        let baseline = match self.snapshots.baseline(source) {
            Ok(baseline) => baseline,
            Err(e) => {
                tracing::warn!(
                    source_id = %source.id,
                    "Could not read previous snapshot, treating every item as new: {}",
                    e
                );
                Baseline::default()
            }
        };

        let result = match self.factory.run(source, &baseline.url_hashes).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(source_id = %source.id, "Skipping misconfigured source: {}", e);
                return RunOutcome::Misconfigured(e);
            }
        };

        if let Err(e) = self.snapshots.write(&result, source, &baseline) {
            tracing::error!(source_id = %source.id, "Failed to write snapshot: {}", e);
        }
        if let Err(e) = self.logs.append(&CrawlLogEntry::from(&result)) {
            tracing::error!(source_id = %source.id, "Failed to append crawl log: {}", e);
        }
        match self
            .state
            .record_result(&source.id, result.status, result.finished_at)
        {
            Ok(state) if state.consecutive_failures > 0 => tracing::warn!(
                source_id = %source.id,
                "{} consecutive failed crawls",
                state.consecutive_failures
            ),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(source_id = %source.id, "Failed to update runtime state: {}", e)
            }
        }

        RunOutcome::Completed(result)
    }
}
