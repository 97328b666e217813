//! Shared job state: typed single-writer output slots, the error log, and
//! the per-step progress ledger.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::warn;

use briefwise_shared::{EventStatus, JobId, JobSnapshot, JobStatus, ProgressEvent, SYSTEM_AGENT};

use crate::progress::ProgressBroadcaster;

/// Overall progress driven by steps stays below this until the runner
/// declares the job complete.
const STEP_PROGRESS_CEILING: f64 = 0.99;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// A set-once output cell owned by exactly one step.
///
/// Reads never block. Serializes as the contained value or `null`.
pub struct Slot<T> {
    cell: OnceLock<T>,
}

impl<T> Slot<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_filled(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Store the payload. A second write is refused and hands the value back.
    pub fn fill(&self, value: T) -> Result<(), T> {
        self.cell.set(value)
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("Slot").field(v).finish(),
            None => f.write_str("Slot(<empty>)"),
        }
    }
}

impl<T: Serialize> Serialize for Slot<T> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        self.get().serialize(serializer)
    }
}

/// A struct of [`Slot`]s, one per step output, plus the immutable inputs
/// type the job was created with.
pub trait JobState: Default + Serialize + Send + Sync + 'static {
    type Inputs: Send + Sync + 'static;
}

// ---------------------------------------------------------------------------
// Append-only logs
// ---------------------------------------------------------------------------

/// Ordered, append-only list of messages with a linearizable append.
#[derive(Debug, Default)]
pub struct AppendLog {
    entries: Mutex<Vec<String>>,
}

impl AppendLog {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append all messages in one critical section. Returns the new length.
    pub fn append<I, M>(&self, messages: I) -> usize
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        let mut entries = self.lock();
        entries.extend(messages.into_iter().map(Into::into));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Progress ledger
// ---------------------------------------------------------------------------

struct StepCell {
    /// `f64` bits. For values in `[0, 1]` the bit pattern orders like the
    /// value, so `fetch_max` keeps the cell monotonic without a lock.
    bits: AtomicU64,
    weight: f64,
}

/// Per-step progress cells plus the derived overall value.
///
/// The set of cells is fixed when the job starts; each step writes only its
/// own cell. Computing and publishing the overall value happens under one
/// lock so a subscriber never sees it go backwards.
pub struct ProgressLedger {
    cells: HashMap<String, StepCell>,
    total_weight: f64,
    overall: Mutex<f64>,
}

impl ProgressLedger {
    pub fn new<I, N>(weights: I) -> Self
    where
        I: IntoIterator<Item = (N, f64)>,
        N: Into<String>,
    {
        let cells: HashMap<String, StepCell> = weights
            .into_iter()
            .map(|(name, weight)| {
                let weight = if weight.is_finite() && weight > 0.0 {
                    weight
                } else {
                    0.0
                };
                (
                    name.into(),
                    StepCell {
                        bits: AtomicU64::new(0f64.to_bits()),
                        weight,
                    },
                )
            })
            .collect();
        let total_weight = cells.values().map(|c| c.weight).sum();
        Self {
            cells,
            total_weight,
            overall: Mutex::new(0.0),
        }
    }

    /// Raise a step's progress to `fraction` if higher. Unknown steps and
    /// non-finite values are ignored.
    fn record(&self, step: &str, fraction: f64) -> Option<f64> {
        if !fraction.is_finite() {
            return None;
        }
        let cell = self.cells.get(step)?;
        // Adding +0.0 turns -0.0 into +0.0; the sign bit would otherwise win
        // every later fetch_max.
        let bits = (fraction.clamp(0.0, 1.0) + 0.0).to_bits();
        let prev = cell.bits.fetch_max(bits, Ordering::AcqRel);
        Some(f64::from_bits(prev.max(bits)))
    }

    fn weighted(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let sum: f64 = self
            .cells
            .values()
            .map(|c| c.weight * f64::from_bits(c.bits.load(Ordering::Acquire)))
            .sum();
        (sum / self.total_weight).min(STEP_PROGRESS_CEILING)
    }

    fn lock_overall(&self) -> MutexGuard<'_, f64> {
        self.overall.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Optionally record a step fraction, recompute the overall value, and
    /// hand it to `f` while still holding the overall lock.
    pub fn advance<R>(&self, step: Option<(&str, f64)>, f: impl FnOnce(f64) -> R) -> R {
        let mut overall = self.lock_overall();
        if let Some((name, fraction)) = step {
            self.record(name, fraction);
        }
        *overall = overall.max(self.weighted());
        f(*overall)
    }

    /// Pin the overall value to 1.0 and hand it to `f` under the lock.
    pub fn finish<R>(&self, f: impl FnOnce(f64) -> R) -> R {
        let mut overall = self.lock_overall();
        *overall = 1.0;
        f(*overall)
    }

    pub fn overall(&self) -> f64 {
        *self.lock_overall()
    }

    pub fn step(&self, name: &str) -> Option<f64> {
        self.cells
            .get(name)
            .map(|c| f64::from_bits(c.bits.load(Ordering::Acquire)))
    }

    pub fn per_step(&self) -> BTreeMap<String, f64> {
        self.cells
            .iter()
            .map(|(name, c)| (name.clone(), f64::from_bits(c.bits.load(Ordering::Acquire))))
            .collect()
    }
}

impl fmt::Debug for ProgressLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressLedger")
            .field("per_step", &self.per_step())
            .field("overall", &self.overall())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Everything one job's steps share: inputs, typed outputs, errors and
/// progress, plus the broadcaster handle events go out on.
pub struct JobContext<S: JobState> {
    job_id: JobId,
    inputs: S::Inputs,
    state: S,
    errors: AppendLog,
    warnings: AppendLog,
    progress: ProgressLedger,
    broadcaster: ProgressBroadcaster,
    created_at: DateTime<Utc>,
}

impl<S: JobState> JobContext<S> {
    pub fn new<I, N>(
        job_id: JobId,
        inputs: S::Inputs,
        step_weights: I,
        broadcaster: ProgressBroadcaster,
    ) -> Self
    where
        I: IntoIterator<Item = (N, f64)>,
        N: Into<String>,
    {
        Self {
            job_id,
            inputs,
            state: S::default(),
            errors: AppendLog::default(),
            warnings: AppendLog::default(),
            progress: ProgressLedger::new(step_weights),
            broadcaster,
            created_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn inputs(&self) -> &S::Inputs {
        &self.inputs
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Append error messages atomically; existing entries are never touched.
    pub fn append_errors<I, M>(&self, messages: I) -> usize
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.errors.append(messages)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.to_vec()
    }

    pub fn add_warning(&self, message: impl Into<String>) {
        self.warnings.append([message.into()]);
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.to_vec()
    }

    /// Record a step's own progress fraction and return the new overall value.
    pub fn merge_agent_progress(&self, step: &str, fraction: f64) -> f64 {
        self.progress.advance(Some((step, fraction)), |overall| overall)
    }

    pub fn overall_progress(&self) -> f64 {
        self.progress.overall()
    }

    pub fn step_progress(&self, step: &str) -> Option<f64> {
        self.progress.step(step)
    }

    /// Publish an event for `agent`, optionally raising its own progress to
    /// `agent_fraction` first. The event carries the overall value computed
    /// under the same lock that orders publication.
    pub fn publish(
        &self,
        agent: &str,
        status: EventStatus,
        message: impl Into<String>,
        detail: Option<String>,
        agent_fraction: Option<f64>,
    ) {
        let message = message.into();
        let step = agent_fraction.map(|f| (agent, f));
        self.progress.advance(step, |overall| {
            let mut event = ProgressEvent::new(agent, status, message, overall);
            event.detail = detail;
            if let Some(fraction) = agent_fraction {
                event = event.with_agent_progress(fraction);
            }
            self.broadcaster.publish(&self.job_id, event);
        });
    }

    /// Publish the job's final event. Completion pins overall progress to 1.0;
    /// an error keeps the current value.
    pub fn publish_terminal(&self, status: JobStatus, message: impl Into<String>) {
        let message = message.into();
        match status {
            JobStatus::Completed => self.progress.finish(|overall| {
                let event = ProgressEvent::new(SYSTEM_AGENT, EventStatus::Completed, message, overall);
                self.broadcaster.publish(&self.job_id, event);
            }),
            _ => self.progress.advance(None, |overall| {
                let event = ProgressEvent::new(SYSTEM_AGENT, EventStatus::Error, message, overall);
                self.broadcaster.publish(&self.job_id, event);
            }),
        }
    }

    /// Point-in-time view of the job with the given lifecycle status.
    pub fn snapshot(&self, status: JobStatus) -> JobSnapshot {
        let step_outputs = serde_json::to_value(&self.state).unwrap_or_else(|e| {
            warn!(job_id = %self.job_id, error = %e, "failed to serialize job state");
            serde_json::Value::Null
        });
        let overall_progress = match status {
            JobStatus::Completed => 1.0,
            _ => self.overall_progress(),
        };
        JobSnapshot {
            job_id: self.job_id.clone(),
            status,
            step_outputs,
            errors: self.errors(),
            warnings: self.warnings(),
            overall_progress,
            per_step_progress: self.progress.per_step(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

impl<S: JobState + fmt::Debug> fmt::Debug for JobContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("state", &self.state)
            .field("errors", &self.errors)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
