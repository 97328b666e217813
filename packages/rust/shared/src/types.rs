//! Core domain types shared by the engine, the stores and the briefing pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent name used for job-level (not step-level) progress events.
pub const SYSTEM_AGENT: &str = "system";

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `completed` and `error` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Status carried by a single progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Completed,
    Error,
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// A progress record broadcast to subscribers of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Step name, or [`SYSTEM_AGENT`] for job-level events.
    pub agent: String,
    pub status: EventStatus,
    /// Human-readable status line.
    pub message: String,
    /// Overall job progress in `[0.0, 1.0]`.
    pub progress: f64,
    /// Optional secondary line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The emitting step's own progress in `[0.0, 1.0]`.
    #[serde(
        default,
        rename = "agentProgress",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_progress: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        agent: impl Into<String>,
        status: EventStatus,
        message: impl Into<String>,
        progress: f64,
    ) -> Self {
        Self {
            agent: agent.into(),
            status,
            message: message.into(),
            progress: progress.clamp(0.0, 1.0),
            detail: None,
            agent_progress: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a detail line.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the emitting step's own progress fraction.
    pub fn with_agent_progress(mut self, fraction: f64) -> Self {
        self.agent_progress = Some(fraction.clamp(0.0, 1.0));
        self
    }

    /// A terminal event ends a subscriber's stream.
    pub fn is_terminal(&self) -> bool {
        self.progress >= 1.0 || self.status == EventStatus::Error
    }
}

// ---------------------------------------------------------------------------
// JobSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a job, as returned by polling and kept in job stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Step outputs keyed by slot name; `null` means not produced yet.
    pub step_outputs: serde_json::Value,
    /// Accumulated error messages, in append order.
    pub errors: Vec<String>,
    /// Soft failures of non-essential steps and fallback notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub overall_progress: f64,
    pub per_step_progress: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// A freshly created job with nothing produced yet.
    pub fn pending(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Pending,
            step_outputs: serde_json::Value::Null,
            errors: Vec::new(),
            warnings: Vec::new(),
            overall_progress: 0.0,
            per_step_progress: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a single step output, treating `null` as absent.
    pub fn output(&self, slot: &str) -> Option<&serde_json::Value> {
        self.step_outputs.get(slot).filter(|v| !v.is_null())
    }
}
