//! The unit of work in a pipeline.
//!
//! A [`Step`] declares what it reads and which slot it writes, runs against a
//! [`StepContext`], and reports a [`StepOutcome`] instead of raising. The
//! scheduler commits the outcome into the step's slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use briefwise_shared::{EventStatus, JobId};

use crate::state::{JobContext, JobState, Slot};

// ---------------------------------------------------------------------------
// Descriptor and outcome
// ---------------------------------------------------------------------------

/// Static description of a step: its name, the steps whose outputs it reads,
/// the slot it writes, and how its failure is treated.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDescriptor {
    pub name: String,
    /// Names of steps this step depends on.
    pub reads: Vec<String>,
    /// Name of the single output slot this step owns.
    pub writes: String,
    /// A fatal outcome of an essential step is a job error. Non-essential
    /// steps degrade to a warning and their dependents still run.
    pub essential: bool,
    /// Share of overall job progress.
    pub weight: f64,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, writes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reads: Vec::new(),
            writes: writes.into(),
            essential: true,
            weight: 1.0,
        }
    }

    pub fn reads<I, N>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.reads.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.essential = false;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// What a step hands back to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    /// Normal success.
    Ok(T),
    /// A collaborator failed but the step produced a usable substitute.
    Fallback { payload: T, reason: String },
    /// The step could not produce its output. A partial payload, if any,
    /// is still committed.
    Fatal { message: String, partial: Option<T> },
}

impl<T> StepOutcome<T> {
    pub fn fallback(payload: T, reason: impl Into<String>) -> Self {
        Self::Fallback {
            payload,
            reason: reason.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            partial: None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Reading a dependency the step is not entitled to, or one not produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("step '{step}' read undeclared dependency '{dependency}'")]
    UndeclaredRead { step: String, dependency: String },

    #[error("step '{step}' is missing output of '{dependency}'")]
    MissingDependency { step: String, dependency: String },
}

impl<T> From<DependencyError> for StepOutcome<T> {
    fn from(err: DependencyError) -> Self {
        StepOutcome::fatal(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// An async unit of work writing exactly one slot of `S`.
#[async_trait]
pub trait Step<S: JobState>: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn descriptor(&self) -> StepDescriptor;

    /// The slot this step owns.
    fn slot<'a>(&self, state: &'a S) -> &'a Slot<Self::Output>;

    async fn run(&self, ctx: &StepContext<S>) -> StepOutcome<Self::Output>;
}

/// How a step's outcome was committed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Commit {
    Succeeded,
    Fallback { reason: String },
    Fatal { message: String },
}

/// Object-safe view of a [`Step`] with its output type erased.
#[async_trait]
pub(crate) trait DynStep<S: JobState>: Send + Sync {
    async fn execute(&self, ctx: &StepContext<S>) -> Commit;
}

pub(crate) struct StepAdapter<T>(pub(crate) T);

#[async_trait]
impl<S, T> DynStep<S> for StepAdapter<T>
where
    S: JobState,
    T: Step<S>,
{
    async fn execute(&self, ctx: &StepContext<S>) -> Commit {
        let outcome = self.0.run(ctx).await;
        let slot = self.0.slot(ctx.job.state());

        let (payload, commit) = match outcome {
            StepOutcome::Ok(payload) => (Some(payload), Commit::Succeeded),
            StepOutcome::Fallback { payload, reason } => {
                (Some(payload), Commit::Fallback { reason })
            }
            StepOutcome::Fatal { message, partial } => (partial, Commit::Fatal { message }),
        };

        if let Some(payload) = payload {
            if slot.fill(payload).is_err() {
                error!(step = %ctx.name(), "output slot already written");
                return Commit::Fatal {
                    message: format!("pipeline fault in step {}", ctx.name()),
                };
            }
        }
        commit
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// A step's window onto its job: declared dependencies, inputs, and
/// progress reporting under its own name.
pub struct StepContext<S: JobState> {
    job: Arc<JobContext<S>>,
    descriptor: Arc<StepDescriptor>,
    start_defer: Duration,
    terminal_sent: AtomicBool,
}

impl<S: JobState> StepContext<S> {
    pub fn new(job: Arc<JobContext<S>>, descriptor: Arc<StepDescriptor>, start_defer: Duration) -> Self {
        Self {
            job,
            descriptor,
            start_defer,
            terminal_sent: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn job_id(&self) -> &JobId {
        self.job.job_id()
    }

    pub fn inputs(&self) -> &S::Inputs {
        self.job.inputs()
    }

    /// Output of a declared dependency that must be present.
    pub fn dependency<'a, T>(
        &'a self,
        dependency: &str,
        accessor: impl FnOnce(&'a S) -> &'a Slot<T>,
    ) -> Result<&'a T, DependencyError> {
        self.check_declared(dependency)?;
        accessor(self.job.state())
            .get()
            .ok_or_else(|| DependencyError::MissingDependency {
                step: self.descriptor.name.clone(),
                dependency: dependency.to_string(),
            })
    }

    /// Output of a declared dependency that may legitimately be absent,
    /// e.g. a non-essential step that degraded.
    pub fn optional<'a, T>(
        &'a self,
        dependency: &str,
        accessor: impl FnOnce(&'a S) -> &'a Slot<T>,
    ) -> Option<&'a T> {
        if let Err(e) = self.check_declared(dependency) {
            warn!(error = %e, "optional read refused");
            return None;
        }
        accessor(self.job.state()).get()
    }

    fn check_declared(&self, dependency: &str) -> Result<(), DependencyError> {
        if self.descriptor.reads.iter().any(|d| d == dependency) {
            Ok(())
        } else {
            Err(DependencyError::UndeclaredRead {
                step: self.descriptor.name.clone(),
                dependency: dependency.to_string(),
            })
        }
    }

    /// Announce the step has started, then yield briefly so the event is
    /// flushed before a long collaborator call.
    pub async fn running(&self, message: impl Into<String>) {
        self.job.publish(
            &self.descriptor.name,
            EventStatus::Running,
            message,
            None,
            Some(0.0),
        );
        if !self.start_defer.is_zero() {
            tokio::time::sleep(self.start_defer).await;
        }
    }

    /// Intermediate progress within the step, `fraction` in `[0, 1]`.
    pub fn milestone(&self, message: impl Into<String>, fraction: f64) {
        self.job.publish(
            &self.descriptor.name,
            EventStatus::Running,
            message,
            None,
            Some(fraction),
        );
    }

    /// Same as [`milestone`](Self::milestone) with a secondary line.
    pub fn milestone_with_detail(
        &self,
        message: impl Into<String>,
        detail: impl Into<String>,
        fraction: f64,
    ) {
        self.job.publish(
            &self.descriptor.name,
            EventStatus::Running,
            message,
            Some(detail.into()),
            Some(fraction),
        );
    }

    pub fn completed(&self, message: impl Into<String>) {
        self.terminal_sent.store(true, Ordering::Release);
        self.job.publish(
            &self.descriptor.name,
            EventStatus::Completed,
            message,
            None,
            Some(1.0),
        );
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.terminal_sent.store(true, Ordering::Release);
        self.job
            .publish(&self.descriptor.name, EventStatus::Error, message, None, None);
    }

    pub(crate) fn terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::Acquire)
    }

    pub(crate) fn job(&self) -> &JobContext<S> {
        &self.job
    }
}
