//! The Job Store: a durable record of every unit of work, with a state
//! machine and two atomic RPCs, `claim` and `complete` (§4.1).

pub mod mock;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// A job's position in the state machine of §4.1.
///
/// ```text
/// pending --Claim--> running
/// running --Complete(completed)--> completed           [terminal]
/// running --Complete(failed), attempts<max--> pending  [retry_after set]
/// running --Complete(failed), attempts=max--> failed   [terminal]
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::ScriptoriumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::error::ScriptoriumError::Validation(format!(
                "invalid job status: {other}"
            ))),
        }
    }
}

/// The extensible set of job kinds the registry (§4.3) dispatches on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ParsePaper,
    ExtractElements,
    LinkLibrary,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::ParsePaper => "parse_paper",
            JobKind::ExtractElements => "extract_elements",
            JobKind::LinkLibrary => "link_library",
        };
        write!(f, "{s}")
    }
}

/// Per-kind payload, per the "dynamic payloads → tagged variants"
/// re-architecture (§9). `job_id` is injected by the worker at dispatch
/// time, not stored in the payload itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    ParsePaper { paper_id: Uuid },
    ExtractElements { paper_id: Uuid },
    LinkLibrary { library_id: Uuid, cutoff: Option<DateTime<Utc>> },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ParsePaper { .. } => JobKind::ParsePaper,
            JobPayload::ExtractElements { .. } => JobKind::ExtractElements,
            JobPayload::LinkLibrary { .. } => JobKind::LinkLibrary,
        }
    }
}

/// A durable job record (§3's "Job").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub retry_after: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: Value,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// Statuses to search over for the `statuses` parameter of
/// `LastClaimedAtOfKindForSubject` and friends.
#[derive(Debug, Clone, Copy)]
pub struct StatusSet(pub &'static [JobStatus]);

impl StatusSet {
    pub const ACTIVE: StatusSet = StatusSet(&[JobStatus::Pending, JobStatus::Running]);
    pub const COMPLETED_OR_RUNNING: StatusSet = StatusSet(&[JobStatus::Completed, JobStatus::Running]);
}

/// Outcome reported to `Complete` (§4.1).
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed { result: Value },
    Failed { error: String },
}

/// Result of a `Complete` call: `Ok` means the store accepted the
/// transition, `Rejected` means ownership/state didn't match (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Ok,
    Rejected,
}

/// Core trait for persistent job storage backends (§4.1).
///
/// Implementations must ensure atomicity for `claim` and maintain
/// consistency across crashes: no two concurrent callers may claim the
/// same job, and `complete`/`put_progress` must check ownership.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Pure insert; returns the new job in *pending*.
    async fn enqueue(&self, payload: JobPayload, max_attempts: i32) -> Result<Job>;

    /// Atomically claims the oldest *pending* job whose `retry_after` is
    /// null or past, flips it to *running*, and returns it. `None` if no
    /// job is claimable.
    async fn claim(&self, worker_id: &str) -> Result<Option<Job>>;

    /// Transitions a *running* job owned by `worker_id` to its terminal or
    /// retry state. Returns `Rejected` if the caller does not own the job
    /// or it is not currently *running*.
    async fn complete(&self, job_id: Uuid, worker_id: &str, outcome: Outcome) -> Result<CompleteOutcome>;

    async fn get_progress(&self, job_id: Uuid) -> Result<Value>;

    /// Overwrites the opaque progress bag. Rejected (returns `Ok(false)`)
    /// if the caller does not currently own the job.
    async fn put_progress(&self, job_id: Uuid, worker_id: &str, progress: Value) -> Result<bool>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Any *pending* or *running* job of `kind` whose payload has
    /// `payload[key] == value`, optionally excluding `exclude_job_id`.
    async fn has_active_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        exclude_job_id: Option<Uuid>,
    ) -> Result<bool>;

    /// Pending-only, `created_at >= now - window`.
    async fn recent_pending_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        window: chrono::Duration,
    ) -> Result<bool>;

    /// Most recent `claimed_at` among jobs of `kind` with matching payload
    /// subject and one of `statuses`; `None` if no such job exists.
    async fn last_claimed_at_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        statuses: StatusSet,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Returns *running* jobs whose `claimed_at` predates `threshold` to
    /// *pending* with `attempts` preserved and ownership cleared. Returns
    /// the count reclaimed.
    async fn reclaim_stale(&self, threshold: chrono::Duration) -> Result<u64>;
}
