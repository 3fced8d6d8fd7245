//! Recurring crawl jobs and the daily pipeline job
//!
//! Every enabled source gets its own loop task that sleeps until the next
//! firing of its preset (plus jitter) and then crawls through the shared
//! [`SourceRunner`]. Coalescing lives in the runner, so a firing that lands
//! while the same source is still being crawled is skipped and counted.
//!
//! Shutdown flips a watch channel: sleeping loops exit at once, loops in the
//! middle of a crawl finish it first. Nothing is aborted.

mod job;
mod trigger;

pub use job::{JobInfo, JobKind, JobState, JobTable};
pub use trigger::{interval, jitter, next_calendar, next_fire, next_pipeline_run, Calendar};

use crate::config::{PipelineConfig, SchedulerConfig, SourceConfig};
use crate::crawler::{panic_message, RunOutcome, SourceRunner};
use crate::pipeline::PipelineRunner;
use crate::TideError;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Job id of the daily pipeline run
pub const PIPELINE_JOB: &str = "pipeline";

/// Answer to a manual trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The run was started in the background
    Accepted,
    NotFound,
    /// A run of the same source (or the pipeline) is still in flight
    AlreadyRunning,
    /// The scheduler has been shut down
    ShuttingDown,
}

struct Inner {
    config: SchedulerConfig,
    pipeline_config: PipelineConfig,
    sources: Arc<[SourceConfig]>,
    runner: Arc<SourceRunner>,
    pipeline: Arc<PipelineRunner>,
    jobs: JobTable,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    fn source_enabled(&self, source: &SourceConfig) -> bool {
        match self.runner.state().is_enabled(source) {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::warn!(source_id = %source.id, "Could not read runtime state: {}", e);
                source.is_enabled
            }
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One crawl of `source`, with the job table kept in step
    async fn run_source(&self, source: &SourceConfig) {
        let previous = self.jobs.running(&source.id).unwrap_or(JobState::Idle);
        let outcome = AssertUnwindSafe(self.runner.run(source)).catch_unwind().await;
        match outcome {
            Ok(RunOutcome::Completed(result)) => {
                self.jobs.finished(&source.id, result.status.as_str());
            }
            Ok(RunOutcome::AlreadyRunning) => self.jobs.coalesced(&source.id, previous),
            Ok(RunOutcome::Misconfigured(_)) => self.jobs.finished(&source.id, "misconfigured"),
            Err(payload) => {
                tracing::error!(
                    source_id = %source.id,
                    "Crawl job panicked: {}",
                    panic_message(payload.as_ref())
                );
                self.jobs.finished(&source.id, "panicked");
            }
        }
    }

    async fn run_pipeline(&self) {
        let previous = self.jobs.running(PIPELINE_JOB).unwrap_or(JobState::Idle);
        match self.pipeline.run().await {
            Some(result) => self.jobs.finished(PIPELINE_JOB, result.status.as_str()),
            None => self.jobs.coalesced(PIPELINE_JOB, previous),
        }
    }

    /// Sleeps for `wait`; false if shutdown was signalled first
    async fn sleep_unless_stopped(&self, wait: Duration, stop: &mut watch::Receiver<bool>) -> bool {
        if *stop.borrow() {
            return false;
        }
        let signalled = tokio::select! {
            _ = tokio::time::sleep(wait) => false,
            _ = stop.changed() => true,
        };
        !signalled && !*stop.borrow()
    }
}

async fn source_loop(inner: Arc<Inner>, source: SourceConfig) {
    let mut stop = inner.shutdown.subscribe();
    loop {
        let next = next_fire(source.schedule, Utc::now(), &inner.config)
            + jitter(inner.config.jitter_seconds);
        inner.jobs.scheduled(&source.id, next);
        tracing::debug!(source_id = %source.id, "Next crawl at {}", next);

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        if !inner.sleep_unless_stopped(wait, &mut stop).await {
            break;
        }

        if !inner.source_enabled(&source) {
            tracing::debug!(source_id = %source.id, "Source disabled; skipping firing");
            inner.jobs.set_disabled(&source.id, true);
            continue;
        }
        inner.run_source(&source).await;
    }
    tracing::debug!(source_id = %source.id, "Crawl loop stopped");
}

async fn pipeline_loop(inner: Arc<Inner>) {
    let mut stop = inner.shutdown.subscribe();
    loop {
        let next = next_pipeline_run(
            Utc::now(),
            inner.pipeline_config.hour,
            inner.pipeline_config.minute,
            &inner.config,
        );
        inner.jobs.scheduled(PIPELINE_JOB, next);
        tracing::info!("Next pipeline run at {}", next);

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        if !inner.sleep_unless_stopped(wait, &mut stop).await {
            break;
        }
        inner.run_pipeline().await;
    }
    tracing::debug!("Pipeline loop stopped");
}

/// Owner of every recurring job
pub struct Scheduler {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        pipeline_config: PipelineConfig,
        sources: Arc<[SourceConfig]>,
        runner: Arc<SourceRunner>,
        pipeline: Arc<PipelineRunner>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                pipeline_config,
                sources,
                runner,
                pipeline,
                jobs: JobTable::new(),
                shutdown,
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.inner.sources
    }

    pub fn runner(&self) -> &Arc<SourceRunner> {
        &self.inner.runner
    }

    pub fn pipeline(&self) -> &Arc<PipelineRunner> {
        &self.inner.pipeline
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn spawn_source_loop(&self, source: &SourceConfig) {
        if !self
            .inner
            .jobs
            .register(&source.id, JobKind::Source, source.schedule.as_str(), JobState::Idle)
        {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let source = source.clone();
        self.track(tokio::spawn(source_loop(inner, source)));
    }

    /// Registers a job for every enabled source and the pipeline job
    ///
    /// Calling it again is a no-op. Sources disabled now get a job the first
    /// time they are enabled.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut registered = 0;
        for source in self.inner.sources.iter() {
            if self.inner.source_enabled(source) {
                self.spawn_source_loop(source);
                registered += 1;
            }
        }

        if self.inner.pipeline_config.enabled {
            self.inner
                .jobs
                .register(PIPELINE_JOB, JobKind::Pipeline, "daily", JobState::Idle);
            self.track(tokio::spawn(pipeline_loop(Arc::clone(&self.inner))));
        }

        tracing::info!(
            "Scheduler started: {} of {} sources scheduled, pipeline {}",
            registered,
            self.inner.sources.len(),
            if self.inner.pipeline_config.enabled { "enabled" } else { "disabled" }
        );
    }

    /// Crawls one source now, outside its schedule
    pub fn trigger_source(&self, source_id: &str) -> TriggerOutcome {
        if self.inner.stopping() {
            return TriggerOutcome::ShuttingDown;
        }
        let Some(source) = self.inner.source(source_id).cloned() else {
            return TriggerOutcome::NotFound;
        };
        if self.inner.runner.is_running(source_id) {
            return TriggerOutcome::AlreadyRunning;
        }

        tracing::info!(source_id = %source_id, "Manual crawl triggered");
        let inner = Arc::clone(&self.inner);
        self.track(tokio::spawn(async move { inner.run_source(&source).await }));
        TriggerOutcome::Accepted
    }

    /// Runs the whole pipeline now in the background
    pub fn trigger_pipeline(&self) -> TriggerOutcome {
        if self.inner.stopping() {
            return TriggerOutcome::ShuttingDown;
        }
        if self.inner.pipeline.is_running() {
            return TriggerOutcome::AlreadyRunning;
        }

        tracing::info!("Manual pipeline run triggered");
        let inner = Arc::clone(&self.inner);
        self.track(tokio::spawn(async move { inner.run_pipeline().await }));
        TriggerOutcome::Accepted
    }

    /// Persists an enable override that the next firing honors
    pub fn set_source_enabled(&self, source_id: &str, enabled: bool) -> Result<(), TideError> {
        let source = self
            .inner
            .source(source_id)
            .ok_or_else(|| TideError::UnknownSource(source_id.to_string()))?;

        self.inner
            .runner
            .state()
            .set_enabled_override(source_id, Some(enabled))?;
        tracing::info!(
            source_id = %source_id,
            "Source {}",
            if enabled { "enabled" } else { "disabled" }
        );

        if self.inner.jobs.contains(source_id) {
            self.inner.jobs.set_disabled(source_id, !enabled);
        } else if enabled && self.is_started() && !self.inner.stopping() {
            self.spawn_source_loop(source);
        }
        Ok(())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.inner.jobs.all()
    }

    pub fn job(&self, id: &str) -> Option<JobInfo> {
        self.inner.jobs.get(id)
    }

    /// Stops new firings and waits for in-flight work
    ///
    /// Waits at most the configured grace period; anything still running
    /// after that is left to finish on its own. Calling it twice is harmless.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let grace = Duration::from_secs(self.inner.config.shutdown_grace_seconds);
        tracing::info!("Scheduler stopping; waiting up to {}s for {} jobs", grace.as_secs(), tasks.len());

        match tokio::time::timeout(grace, futures::future::join_all(tasks)).await {
            Ok(_) => tracing::info!("Scheduler stopped"),
            Err(_) => tracing::warn!(
                "{} crawls still in flight after the grace period; leaving them running",
                self.inner.runner.in_flight()
            ),
        }
    }
}
