//! Job table: what every recurring job is doing

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Scheduled,
    Running,
    /// Firings are skipped until the source is enabled again
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Source,
    Pipeline,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub kind: JobKind,
    pub schedule: String,
    pub state: JobState,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    /// Firings skipped because the previous run was still in flight
    pub coalesced: u64,
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Mutex<BTreeMap<String, JobInfo>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, JobInfo>) -> R) -> R {
        f(&mut self.jobs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn with_job(&self, id: &str, f: impl FnOnce(&mut JobInfo)) {
        self.with(|jobs| {
            if let Some(job) = jobs.get_mut(id) {
                f(job);
            }
        })
    }

    /// Adds a job in `state`; returns false if it already exists
    pub fn register(&self, id: &str, kind: JobKind, schedule: &str, state: JobState) -> bool {
        self.with(|jobs| {
            if jobs.contains_key(id) {
                return false;
            }
            jobs.insert(
                id.to_string(),
                JobInfo {
                    id: id.to_string(),
                    kind,
                    schedule: schedule.to_string(),
                    state,
                    next_run: None,
                    last_run: None,
                    last_status: None,
                    coalesced: 0,
                },
            );
            true
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.with(|jobs| jobs.contains_key(id))
    }

    /// Records the next firing; disabled and running jobs keep their state
    pub fn scheduled(&self, id: &str, next_run: DateTime<Utc>) {
        self.with_job(id, |job| {
            job.next_run = Some(next_run);
            if matches!(job.state, JobState::Idle | JobState::Scheduled) {
                job.state = JobState::Scheduled;
            }
        })
    }

    /// Marks a job running and returns the state it left
    pub fn running(&self, id: &str) -> Option<JobState> {
        let mut previous = None;
        self.with_job(id, |job| {
            previous = Some(job.state);
            job.state = JobState::Running;
            job.last_run = Some(Utc::now());
        });
        previous
    }

    /// Records the run's status; a job disabled mid-run stays disabled
    pub fn finished(&self, id: &str, status: &str) {
        self.with_job(id, |job| {
            if job.state != JobState::Disabled {
                job.state = JobState::Idle;
            }
            job.last_status = Some(status.to_string());
        })
    }

    /// Counts a skipped firing and restores the state from before it
    pub fn coalesced(&self, id: &str, previous: JobState) {
        self.with_job(id, |job| {
            job.coalesced += 1;
            job.state = previous;
        })
    }

    /// Marks a job disabled, or takes it back to scheduled/idle
    pub fn set_disabled(&self, id: &str, disabled: bool) {
        self.with_job(id, |job| {
            job.state = match (disabled, job.state, job.next_run) {
                (true, _, _) => JobState::Disabled,
                (false, JobState::Running, _) => JobState::Running,
                (false, _, Some(_)) => JobState::Scheduled,
                (false, _, None) => JobState::Idle,
            };
        })
    }

    pub fn get(&self, id: &str) -> Option<JobInfo> {
        self.with(|jobs| jobs.get(id).cloned())
    }

    pub fn state(&self, id: &str) -> Option<JobState> {
        self.with(|jobs| jobs.get(id).map(|j| j.state))
    }

    /// All jobs ordered by id
    pub fn all(&self) -> Vec<JobInfo> {
        self.with(|jobs| jobs.values().cloned().collect())
    }
}
