//! Job lifecycle around the scheduler: create, run, persist, announce.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use briefwise_shared::{
    EngineConfig, EventStatus, JobId, JobSnapshot, JobStatus, Result, SYSTEM_AGENT,
};

use crate::graph::Pipeline;
use crate::progress::{ProgressBroadcaster, ProgressItem, Subscription};
use crate::scheduler::{ExecutionReport, Scheduler};
use crate::state::{JobContext, JobState};
use crate::store::JobStore;

/// Engine tuning for a runner.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Pause after each step's start event.
    pub start_defer: Duration,
    /// Silence interval before a progress stream emits a keepalive.
    pub keepalive: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RunnerOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            start_defer: config.start_defer(),
            keepalive: config.keepalive(),
        }
    }
}

struct LiveJob<S: JobState> {
    ctx: Arc<JobContext<S>>,
    status: JobStatus,
}

/// Runs jobs of one pipeline and answers status queries about them.
///
/// While a job runs its state is served live; afterwards from the store.
pub struct JobRunner<S: JobState> {
    pipeline: Arc<Pipeline<S>>,
    scheduler: Scheduler,
    broadcaster: ProgressBroadcaster,
    store: Arc<dyn JobStore>,
    live: Arc<DashMap<JobId, LiveJob<S>>>,
    keepalive: Duration,
}

impl<S: JobState> Clone for JobRunner<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            scheduler: self.scheduler.clone(),
            broadcaster: self.broadcaster.clone(),
            store: Arc::clone(&self.store),
            live: Arc::clone(&self.live),
            keepalive: self.keepalive,
        }
    }
}

impl<S: JobState> JobRunner<S> {
    pub fn new(
        pipeline: Arc<Pipeline<S>>,
        store: Arc<dyn JobStore>,
        broadcaster: ProgressBroadcaster,
        options: RunnerOptions,
    ) -> Self {
        Self {
            pipeline,
            scheduler: Scheduler::new(options.start_defer),
            broadcaster,
            store,
            live: Arc::new(DashMap::new()),
            keepalive: options.keepalive,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<S>> {
        &self.pipeline
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Launch a job in the background. The handle resolves to its final
    /// snapshot.
    pub fn start_job(&self, job_id: JobId, inputs: S::Inputs) -> JoinHandle<JobSnapshot> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_job(job_id, inputs).await })
    }

    /// Run a job to completion and return its final snapshot.
    ///
    /// Always ends with a terminal status and a terminal progress event,
    /// including when the engine faults or the store is unavailable.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run_job(&self, job_id: JobId, inputs: S::Inputs) -> JobSnapshot {
        let job = Arc::new(JobContext::new(
            job_id.clone(),
            inputs,
            self.pipeline.progress_weights(),
            self.broadcaster.clone(),
        ));
        self.live.insert(
            job_id.clone(),
            LiveJob {
                ctx: Arc::clone(&job),
                status: JobStatus::Pending,
            },
        );
        self.persist(&job.snapshot(JobStatus::Pending)).await;

        info!(steps = self.pipeline.len(), "job started");
        job.publish(SYSTEM_AGENT, EventStatus::Running, "Pipeline started", None, None);
        if let Some(mut live) = self.live.get_mut(&job_id) {
            live.status = JobStatus::Running;
        }
        self.persist(&job.snapshot(JobStatus::Running)).await;

        // A separate task so an engine panic surfaces as a JoinError here.
        let scheduler = self.scheduler.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let ctx = Arc::clone(&job);
        let execution =
            tokio::spawn(async move { scheduler.execute(&pipeline, &ctx).await }).await;

        match execution {
            Ok(report) => log_report(&report),
            Err(e) => {
                error!(error = %e, "scheduler aborted");
                job.append_errors([format!("pipeline fault: {e}")]);
            }
        }

        let status = if job.has_errors() {
            JobStatus::Error
        } else {
            JobStatus::Completed
        };
        let snapshot = job.snapshot(status);
        self.persist(&snapshot).await;
        self.live.remove(&job_id);

        match status {
            JobStatus::Completed => {
                info!(warnings = snapshot.warnings.len(), "job completed");
                job.publish_terminal(JobStatus::Completed, "Pipeline completed");
            }
            _ => {
                let errors = snapshot.errors.join("; ");
                warn!(%errors, "job failed");
                job.publish_terminal(JobStatus::Error, format!("Pipeline failed: {errors}"));
            }
        }
        self.broadcaster.close(&job_id);

        snapshot
    }

    /// Current view of a job: live while it runs, from the store afterwards.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<JobSnapshot>> {
        let live = self
            .live
            .get(job_id)
            .map(|entry| (Arc::clone(&entry.ctx), entry.status));
        if let Some((ctx, status)) = live {
            return Ok(Some(ctx.snapshot(status)));
        }
        self.store.get(job_id).await
    }

    /// All stored jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>> {
        self.store.list().await
    }

    /// Raw subscription to a job's progress events.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        self.broadcaster.subscribe(job_id)
    }

    /// Progress stream with keepalives that ends after the terminal event.
    /// Subscribing late yields only events published from now on.
    pub fn subscribe_progress(&self, job_id: &JobId) -> impl Stream<Item = ProgressItem> + Send + use<S> {
        self.broadcaster.subscribe(job_id).into_stream(self.keepalive)
    }

    async fn persist(&self, snapshot: &JobSnapshot) {
        if let Err(e) = self.store.put(snapshot).await {
            error!(
                job_id = %snapshot.job_id,
                status = %snapshot.status,
                error = %e,
                "failed to persist job snapshot"
            );
        }
    }
}

fn log_report(report: &ExecutionReport) {
    for step in &report.steps {
        debug!(
            step = %step.name,
            state = ?step.state,
            degraded = step.degraded,
            elapsed_ms = step.elapsed.map(|d| d.as_millis() as u64),
            "step result"
        );
    }
}
