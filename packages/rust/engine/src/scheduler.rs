//! Runs a [`Pipeline`] over one job's context.
//!
//! Each step moves `Blocked → Ready → Running → {Succeeded, Failed}`; steps
//! that never become ready end `Skipped`. Ready steps launch concurrently as
//! Tokio tasks and the loop re-evaluates readiness after every completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use briefwise_shared::EventStatus;

use crate::graph::{ExecutionMode, Pipeline};
use crate::state::{JobContext, JobState};
use crate::step::{Commit, DynStep, StepContext};

/// Lifecycle of a step within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Blocked,
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Never became ready.
    Skipped,
}

/// Final state of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub state: StepState,
    /// A non-essential step failed; dependents ran without its output.
    pub degraded: bool,
    /// Reason given when the step fell back to a substitute payload.
    pub fallback: Option<String>,
    pub elapsed: Option<Duration>,
}

/// Outcome of running a pipeline for one job.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub steps: Vec<StepReport>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<StepState> {
        self.step(name).map(|s| s.state)
    }

    pub fn names_in(&self, state: StepState) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Every step succeeded without degrading.
    pub fn is_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.state == StepState::Succeeded && !s.degraded)
    }
}

/// Executes pipelines. Holds only engine tuning; safe to share across jobs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    start_defer: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

type Finished<S> = (usize, Result<(Commit, StepContext<S>, Duration), tokio::task::JoinError>);

impl Scheduler {
    /// `start_defer` is the pause each step takes after its start event.
    pub fn new(start_defer: Duration) -> Self {
        Self { start_defer }
    }

    /// Run every reachable step of `pipeline` against `job`.
    ///
    /// Never fails: step failures are recorded in the job's error log and
    /// reflected in the returned report.
    #[instrument(skip_all, fields(job_id = %job.job_id(), mode = ?pipeline.mode(), steps = pipeline.len()))]
    pub async fn execute<S: JobState>(
        &self,
        pipeline: &Arc<Pipeline<S>>,
        job: &Arc<JobContext<S>>,
    ) -> ExecutionReport {
        let started = Instant::now();
        let n = pipeline.nodes.len();
        let mut states = vec![StepState::Blocked; n];
        // Succeeded, or failed without blocking dependents.
        let mut satisfied = vec![false; n];
        let mut reports: Vec<StepReport> = pipeline
            .nodes
            .iter()
            .map(|node| StepReport {
                name: node.descriptor.name.clone(),
                state: StepState::Blocked,
                degraded: false,
                fallback: None,
                elapsed: None,
            })
            .collect();

        let mut running = FuturesUnordered::new();

        loop {
            self.promote(pipeline, job, &mut states, &satisfied);

            for i in 0..n {
                if states[i] != StepState::Ready {
                    continue;
                }
                states[i] = StepState::Running;
                running.push(self.launch(pipeline, job, i));
            }

            let Some((i, result)) = running.next().await else {
                break;
            };
            self.settle(pipeline, job, i, result, &mut states, &mut satisfied, &mut reports);
        }

        for (i, state) in states.iter_mut().enumerate() {
            if *state == StepState::Blocked {
                *state = StepState::Skipped;
                debug!(step = %pipeline.nodes[i].descriptor.name, "step skipped");
            }
            reports[i].state = *state;
        }

        let report = ExecutionReport {
            steps: reports,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            succeeded = report.names_in(StepState::Succeeded).len(),
            failed = report.names_in(StepState::Failed).len(),
            skipped = report.names_in(StepState::Skipped).len(),
            "pipeline finished"
        );
        report
    }

    fn promote<S: JobState>(
        &self,
        pipeline: &Pipeline<S>,
        job: &JobContext<S>,
        states: &mut [StepState],
        satisfied: &[bool],
    ) {
        let halted = pipeline.mode() == ExecutionMode::StrictChain && job.has_errors();
        if halted {
            return;
        }
        for (i, node) in pipeline.nodes.iter().enumerate() {
            if states[i] == StepState::Blocked && node.deps.iter().all(|&d| satisfied[d]) {
                states[i] = StepState::Ready;
            }
        }
    }

    fn launch<S: JobState>(
        &self,
        pipeline: &Pipeline<S>,
        job: &Arc<JobContext<S>>,
        i: usize,
    ) -> BoxFuture<'static, Finished<S>> {
        let node = &pipeline.nodes[i];
        let step = Arc::clone(&node.step);
        let ctx = StepContext::new(Arc::clone(job), Arc::clone(&node.descriptor), self.start_defer);
        info!(step = %node.descriptor.name, "step started");

        tokio::spawn(async move {
            let started = Instant::now();
            let commit = step.execute(&ctx).await;
            (commit, ctx, started.elapsed())
        })
        .map(move |result| (i, result))
        .boxed()
    }

    #[allow(clippy::too_many_arguments)]
    fn settle<S: JobState>(
        &self,
        pipeline: &Pipeline<S>,
        job: &JobContext<S>,
        i: usize,
        result: Result<(Commit, StepContext<S>, Duration), tokio::task::JoinError>,
        states: &mut [StepState],
        satisfied: &mut [bool],
        reports: &mut [StepReport],
    ) {
        let descriptor = &pipeline.nodes[i].descriptor;
        let name = descriptor.name.as_str();

        let (commit, ctx, elapsed) = match result {
            Ok(done) => done,
            Err(join_error) => {
                let message = format!("pipeline fault in step {name}");
                error!(step = name, error = %join_error, "step task aborted");
                job.append_errors([message.clone()]);
                job.publish(name, EventStatus::Error, message, None, None);
                states[i] = StepState::Failed;
                return;
            }
        };
        reports[i].elapsed = Some(elapsed);
        let elapsed_ms = elapsed.as_millis() as u64;
        let announce = !ctx.terminal_sent();

        match commit {
            Commit::Succeeded => {
                info!(step = name, elapsed_ms, "step succeeded");
                states[i] = StepState::Succeeded;
                satisfied[i] = true;
                if announce {
                    job.publish(name, EventStatus::Completed, format!("{name} completed"), None, Some(1.0));
                }
            }
            Commit::Fallback { reason } => {
                warn!(step = name, elapsed_ms, %reason, "step fell back");
                states[i] = StepState::Succeeded;
                satisfied[i] = true;
                job.add_warning(format!("{name}: {reason}"));
                if announce {
                    job.publish(
                        name,
                        EventStatus::Completed,
                        format!("{name} completed with fallback"),
                        Some(reason.clone()),
                        Some(1.0),
                    );
                }
                reports[i].fallback = Some(reason);
            }
            Commit::Fatal { message } if !descriptor.essential => {
                warn!(step = name, elapsed_ms, %message, "non-essential step failed");
                states[i] = StepState::Failed;
                satisfied[i] = true;
                reports[i].degraded = true;
                job.add_warning(format!("{name}: {message}"));
                if announce {
                    job.publish(
                        name,
                        EventStatus::Completed,
                        format!("{name} unavailable"),
                        Some(message),
                        Some(1.0),
                    );
                }
            }
            Commit::Fatal { message } => {
                error!(step = name, elapsed_ms, %message, "step failed");
                states[i] = StepState::Failed;
                job.append_errors([message.clone()]);
                if announce {
                    job.publish(name, EventStatus::Error, message, None, None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineBuilder;
    use crate::progress::ProgressBroadcaster;
    use crate::state::Slot;
    use crate::step::{Step, StepDescriptor, StepOutcome};
    use async_trait::async_trait;
    use briefwise_shared::JobId;
    use serde::Serialize;

    #[derive(Debug, Default, Serialize)]
    struct Chain {
        first: Slot<u32>,
        second: Slot<u32>,
    }

    impl JobState for Chain {
        type Inputs = bool;
    }

    struct First;

    #[async_trait]
    impl Step<Chain> for First {
        type Output = u32;

        fn descriptor(&self) -> StepDescriptor {
            StepDescriptor::new("first", "first")
        }

        fn slot<'a>(&self, state: &'a Chain) -> &'a Slot<u32> {
            &state.first
        }

        async fn run(&self, ctx: &StepContext<Chain>) -> StepOutcome<u32> {
            if *ctx.inputs() {
                StepOutcome::fatal("first exploded")
            } else {
                StepOutcome::Ok(1)
            }
        }
    }

    struct Second;

    #[async_trait]
    impl Step<Chain> for Second {
        type Output = u32;

        fn descriptor(&self) -> StepDescriptor {
            StepDescriptor::new("second", "second").reads(["first"])
        }

        fn slot<'a>(&self, state: &'a Chain) -> &'a Slot<u32> {
            &state.second
        }

        async fn run(&self, ctx: &StepContext<Chain>) -> StepOutcome<u32> {
            match ctx.dependency("first", |s| &s.first) {
                Ok(v) => StepOutcome::Ok(v + 1),
                Err(e) => e.into(),
            }
        }
    }

    fn setup(fail_first: bool) -> (Arc<Pipeline<Chain>>, Arc<JobContext<Chain>>) {
        let pipeline = Arc::new(
            PipelineBuilder::new(ExecutionMode::StrictChain)
                .step(First)
                .step(Second)
                .build()
                .unwrap(),
        );
        let job = Arc::new(JobContext::new(
            JobId::new(),
            fail_first,
            pipeline.progress_weights(),
            ProgressBroadcaster::new(16),
        ));
        (pipeline, job)
    }

    #[tokio::test]
    async fn chain_runs_in_order() {
        let (pipeline, job) = setup(false);
        let report = Scheduler::new(Duration::ZERO).execute(&pipeline, &job).await;

        assert!(report.is_clean());
        assert_eq!(job.state().second.get(), Some(&2));
        assert!(job.errors().is_empty());
    }

    #[tokio::test]
    async fn failure_skips_dependents() {
        let (pipeline, job) = setup(true);
        let report = Scheduler::new(Duration::ZERO).execute(&pipeline, &job).await;

        assert_eq!(report.state_of("first"), Some(StepState::Failed));
        assert_eq!(report.state_of("second"), Some(StepState::Skipped));
        assert_eq!(job.errors(), vec!["first exploded".to_string()]);
        assert!(job.state().second.get().is_none());
    }

    #[tokio::test]
    async fn scheduler_announces_steps_that_stay_silent() {
        let (pipeline, job) = setup(false);
        let mut sub = job.broadcaster().subscribe(job.job_id());
        Scheduler::new(Duration::ZERO).execute(&pipeline, &job).await;

        let mut completed = Vec::new();
        while let Some(event) = sub.try_recv() {
            if event.status == EventStatus::Completed {
                completed.push(event.agent);
            }
        }
        assert_eq!(completed, vec!["first".to_string(), "second".to_string()]);
    }
}
