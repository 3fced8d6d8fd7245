//! Per-source runtime health, persisted as one document

use crate::config::SourceConfig;
use crate::crawler::CrawlStatus;
use crate::storage::{DocumentStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

const RUNTIME_STATE_KEY: &str = "runtime_state";
const OBSERVATION_PREFIX: &str = "snapshot_diff";

/// Runtime health of one source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRuntimeState {
    pub last_crawl_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Takes precedence over the configured `is_enabled` when set
    pub is_enabled_override: Option<bool>,
}

impl SourceRuntimeState {
    /// Folds one crawl outcome into the record
    pub fn apply(&mut self, status: CrawlStatus, finished_at: DateTime<Utc>) {
        self.last_crawl_at = Some(finished_at);
        match status {
            CrawlStatus::Success | CrawlStatus::NoNewContent => {
                self.last_success_at = Some(finished_at);
                self.consecutive_failures = 0;
            }
            CrawlStatus::Partial | CrawlStatus::Failed => {
                self.consecutive_failures += 1;
            }
        }
    }
}

/// Last observed page text for a snapshot-diff source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotObservation {
    pub content_hash: String,
    pub text: String,
    pub observed_at: DateTime<Utc>,
}

/// Keyed map of source id to runtime state
///
/// Every mutation is a read-modify-write of the whole document under one
/// lock, so two crawls finishing together cannot lose each other's update.
pub struct CrawlStateStore {
    store: Arc<dyn DocumentStore>,
    lock: Mutex<()>,
}

impl CrawlStateStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> StorageResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| StorageError::Database("runtime state lock poisoned".to_string()))
    }

    fn load(&self) -> StorageResult<BTreeMap<String, SourceRuntimeState>> {
        match self.store.get(RUNTIME_STATE_KEY)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn save(&self, states: &BTreeMap<String, SourceRuntimeState>) -> StorageResult<()> {
        self.store.put(RUNTIME_STATE_KEY, &serde_json::to_value(states)?)
    }

    fn update<F>(&self, source_id: &str, f: F) -> StorageResult<SourceRuntimeState>
    where
        F: FnOnce(&mut SourceRuntimeState),
    {
        let _guard = self.guard()?;
        let mut states = self.load()?;
        let entry = states.entry(source_id.to_string()).or_default();
        f(entry);
        let updated = entry.clone();
        self.save(&states)?;
        Ok(updated)
    }

    /// Records a finished crawl
    pub fn record_result(
        &self,
        source_id: &str,
        status: CrawlStatus,
        finished_at: DateTime<Utc>,
    ) -> StorageResult<SourceRuntimeState> {
        self.update(source_id, |state| state.apply(status, finished_at))
    }

    /// Sets or clears the manual enable override
    pub fn set_enabled_override(
        &self,
        source_id: &str,
        enabled: Option<bool>,
    ) -> StorageResult<SourceRuntimeState> {
        self.update(source_id, |state| state.is_enabled_override = enabled)
    }

    /// Whether a source should run, honoring the override
    pub fn is_enabled(&self, source: &SourceConfig) -> StorageResult<bool> {
        let state = self.get(&source.id)?;
        Ok(state
            .and_then(|s| s.is_enabled_override)
            .unwrap_or(source.is_enabled))
    }

    pub fn get(&self, source_id: &str) -> StorageResult<Option<SourceRuntimeState>> {
        let _guard = self.guard()?;
        Ok(self.load()?.remove(source_id))
    }

    pub fn all(&self) -> StorageResult<BTreeMap<String, SourceRuntimeState>> {
        let _guard = self.guard()?;
        self.load()
    }

    /// Last observation recorded by a snapshot-diff source
    pub fn observation(&self, source_id: &str) -> StorageResult<Option<SnapshotObservation>> {
        let key = format!("{}/{}", OBSERVATION_PREFIX, source_id);
        match self.store.get(&key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn put_observation(
        &self,
        source_id: &str,
        observation: &SnapshotObservation,
    ) -> StorageResult<()> {
        let key = format!("{}/{}", OBSERVATION_PREFIX, source_id);
        self.store.put(&key, &serde_json::to_value(observation)?)
    }
}
