//! Entry point for hosts: builds collaborators, store and runner from
//! configuration and exposes the job operations.

use std::sync::Arc;

use futures::Stream;
use tokio::task::JoinHandle;
use tracing::info;

use briefwise_collaborators::{OpenAiClient, PerplexityClient};
use briefwise_engine::{
    JobRunner, JobStore, ProgressBroadcaster, ProgressItem, RunnerOptions, Subscription,
};
use briefwise_shared::{AppConfig, BriefwiseError, JobId, JobSnapshot, Result, Topology};
use briefwise_storage::open_job_store;

use crate::schema::BriefingInputs;
use crate::state::BriefingState;
use crate::steps::Collaborators;
use crate::topology::build_pipeline;

/// Engine settings for a [`BriefingService`].
#[derive(Debug, Clone)]
pub struct BriefingOptions {
    pub topology: Topology,
    pub subscriber_buffer: usize,
    pub runner: RunnerOptions,
}

impl Default for BriefingOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for BriefingOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            topology: config.pipeline.topology,
            subscriber_buffer: config.engine.subscriber_buffer,
            runner: RunnerOptions::from(&config.engine),
        }
    }
}

/// Negotiation-briefing jobs: start, poll, and stream progress.
#[derive(Clone)]
pub struct BriefingService {
    runner: JobRunner<BriefingState>,
    topology: Topology,
}

impl BriefingService {
    /// Wire the HTTP collaborators and the configured store.
    ///
    /// # Errors
    ///
    /// Fails when an API key variable is unset, an HTTP client cannot be
    /// built, or the store cannot be opened.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let llm = OpenAiClient::from_config(&config.llm)?;
        let research = PerplexityClient::from_config(&config.research)?;
        let store = open_job_store(&config.storage).await?;
        info!(
            topology = ?config.pipeline.topology,
            storage = ?config.storage.backend,
            llm_model = %config.llm.model,
            research_model = %config.research.model,
            "briefing service configured"
        );
        Self::new(
            Collaborators::new(Arc::new(llm), Arc::new(research)),
            store,
            BriefingOptions::from(config),
        )
    }

    pub fn new(
        collaborators: Collaborators,
        store: Arc<dyn JobStore>,
        options: BriefingOptions,
    ) -> Result<Self> {
        let pipeline = build_pipeline(options.topology, &collaborators)?;
        let runner = JobRunner::new(
            Arc::new(pipeline),
            store,
            ProgressBroadcaster::new(options.subscriber_buffer),
            options.runner,
        );
        Ok(Self {
            runner,
            topology: options.topology,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn runner(&self) -> &JobRunner<BriefingState> {
        &self.runner
    }

    /// Start a job under a fresh id and return the id immediately.
    pub fn submit(&self, inputs: BriefingInputs) -> JobId {
        let job_id = JobId::new();
        drop(self.start_job(job_id.clone(), inputs));
        job_id
    }

    pub fn start_job(&self, job_id: JobId, inputs: BriefingInputs) -> JoinHandle<JobSnapshot> {
        self.runner.start_job(job_id, inputs)
    }

    pub async fn run_job(&self, job_id: JobId, inputs: BriefingInputs) -> JobSnapshot {
        self.runner.run_job(job_id, inputs).await
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<JobSnapshot>> {
        self.runner.get_job(job_id).await
    }

    /// Like [`get_job`](Self::get_job), but an unknown id is an error.
    pub async fn job(&self, job_id: &JobId) -> Result<JobSnapshot> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| BriefwiseError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>> {
        self.runner.list_jobs().await
    }

    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        self.runner.subscribe(job_id)
    }

    /// Live progress for `job_id`, with keepalives during silence. Events
    /// published before the call are not replayed.
    pub fn subscribe_progress(
        &self,
        job_id: &JobId,
    ) -> impl Stream<Item = ProgressItem> + Send + use<> {
        self.runner.subscribe_progress(job_id)
    }
}

impl std::fmt::Debug for BriefingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BriefingService")
            .field("topology", &self.topology)
            .field("pipeline", self.runner.pipeline())
            .finish()
    }
}
