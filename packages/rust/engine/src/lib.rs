//! Pipeline execution engine for Briefwise.
//!
//! A job is a DAG of async [`Step`]s sharing one typed [`JobState`]. The
//! [`Scheduler`] runs ready steps concurrently, the [`ProgressBroadcaster`]
//! fans progress out to subscribers, and the [`JobRunner`] wraps a run with
//! persistence and a guaranteed terminal event.

pub mod graph;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod step;
pub mod store;

pub use graph::{ExecutionMode, Pipeline, PipelineBuilder};
pub use progress::{ProgressBroadcaster, ProgressItem, SubscriberId, Subscription};
pub use runner::{JobRunner, RunnerOptions};
pub use scheduler::{ExecutionReport, Scheduler, StepReport, StepState};
pub use state::{AppendLog, JobContext, JobState, ProgressLedger, Slot};
pub use step::{DependencyError, Step, StepContext, StepDescriptor, StepOutcome};
pub use store::{InMemoryJobStore, JobStore};

// Steps implement the async trait with this macro.
pub use async_trait::async_trait;
