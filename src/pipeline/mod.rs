//! The daily multi-stage pipeline
//!
//! Stages run strictly in order. A stage that fails or panics is recorded
//! and the runner moves on, so later stages still work against whatever
//! data earlier runs left behind.

mod stages;

pub use stages::{default_stages, BriefingStage, CrawlAllStage, HookStage, IndexStage};

use crate::crawler::panic_message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// What a stage reports when it does not fail
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Ran to completion with a small key/value summary
    Done(Map<String, Value>),
    /// Bypassed because a prerequisite is absent
    Skipped(String),
}

/// One named step of the pipeline
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the stage; an `Err` marks the stage failed with its message
    async fn run(&self) -> anyhow::Result<StageOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub summary: Map<String, Value>,
    pub error: Option<String>,
}

impl StageResult {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_seconds: 0.0,
            summary: Map::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Success,
    PartialFailure,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub stages: Vec<StageResult>,
}

impl PipelineResult {
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn settle(&mut self) {
        let failed = self.stages.iter().any(|s| s.status == StageStatus::Failed);
        self.status = if failed {
            PipelineStatus::PartialFailure
        } else {
            PipelineStatus::Success
        };
    }
}

/// Runs the configured stages and keeps the latest result
pub struct PipelineRunner {
    stages: Vec<Arc<dyn PipelineStage>>,
    running: AtomicBool,
    latest: RwLock<Option<PipelineResult>>,
}

/// Clears the running flag when dropped
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PipelineRunner {
    pub fn new(stages: Vec<Arc<dyn PipelineStage>>) -> Self {
        Self {
            stages,
            running: AtomicBool::new(false),
            latest: RwLock::new(None),
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The latest result, `None` if the pipeline never ran
    ///
    /// While a run is in progress this reflects the stages finished so far.
    pub fn last_result(&self) -> Option<PipelineResult> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, result: &PipelineResult) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
    }

    fn try_start(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Runs every stage once; `None` if a run is already in progress
    pub async fn run(&self) -> Option<PipelineResult> {
        let Some(_guard) = self.try_start() else {
            tracing::warn!("Pipeline already running; ignoring trigger");
            return None;
        };

        let clock = Instant::now();
        let mut result = PipelineResult {
            status: PipelineStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_seconds: 0.0,
            stages: self.stages.iter().map(|s| StageResult::pending(s.name())).collect(),
        };
        self.publish(&result);
        tracing::info!("Pipeline started with {} stages", self.stages.len());

        for (index, stage) in self.stages.iter().enumerate() {
            result.stages[index].status = StageStatus::Running;
            result.stages[index].started_at = Some(Utc::now());
            self.publish(&result);

            let stage_result = run_stage(stage.as_ref()).await;
            result.stages[index] = stage_result;
            self.publish(&result);
        }

        result.finished_at = Some(Utc::now());
        result.duration_seconds = clock.elapsed().as_secs_f64();
        result.settle();
        self.publish(&result);

        tracing::info!(
            "Pipeline finished: {} in {:.1}s",
            result.status.as_str(),
            result.duration_seconds
        );
        Some(result)
    }
}

async fn run_stage(stage: &dyn PipelineStage) -> StageResult {
    let name = stage.name().to_string();
    let started_at = Utc::now();
    let clock = Instant::now();
    tracing::info!(stage = %name, "Stage started");

    let outcome = AssertUnwindSafe(stage.run()).catch_unwind().await;

    let mut result = StageResult::pending(&name);
    result.started_at = Some(started_at);
    result.finished_at = Some(Utc::now());
    result.duration_seconds = clock.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(StageOutcome::Done(summary))) => {
            result.status = StageStatus::Success;
            result.summary = summary;
            tracing::info!(stage = %name, "Stage succeeded in {:.1}s", result.duration_seconds);
        }
        Ok(Ok(StageOutcome::Skipped(reason))) => {
            tracing::info!(stage = %name, "Stage skipped: {}", reason);
            result.status = StageStatus::Skipped;
            result.summary.insert("reason".to_string(), Value::String(reason));
        }
        Ok(Err(e)) => {
            tracing::error!(stage = %name, "Stage failed: {:#}", e);
            result.status = StageStatus::Failed;
            result.error = Some(format!("{:#}", e));
        }
        Err(payload) => {
            let message = format!("stage panicked: {}", panic_message(payload.as_ref()));
            tracing::error!(stage = %name, "{}", message);
            result.status = StageStatus::Failed;
            result.error = Some(message);
        }
    }
    result
}
