//! Where job snapshots live once a job leaves the runner's live map.

use async_trait::async_trait;
use dashmap::DashMap;

use briefwise_shared::{JobId, JobSnapshot, Result};

/// Persistence for job snapshots. `put` overwrites any earlier snapshot of
/// the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, snapshot: &JobSnapshot) -> Result<()>;

    async fn get(&self, job_id: &JobId) -> Result<Option<JobSnapshot>>;

    /// All stored jobs, newest first.
    async fn list(&self) -> Result<Vec<JobSnapshot>>;
}

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, JobSnapshot>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, snapshot: &JobSnapshot) -> Result<()> {
        self.jobs.insert(snapshot.job_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<JobSnapshot>> {
        Ok(self.jobs.get(job_id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<JobSnapshot>> {
        let mut jobs: Vec<JobSnapshot> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.job_id.cmp(&a.job_id)));
        Ok(jobs)
    }
}
