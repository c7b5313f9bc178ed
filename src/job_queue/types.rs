//! Job queue type definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identity of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key grouping jobs that must run strictly one after another
///
/// Jobs submitted without a key get `QueueKey::Job(own id)`, making each of
/// them a singleton queue that never waits on another job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKey {
    /// Caller-chosen queue name (e.g. a deploy target or a repository)
    Named(String),
    /// Private queue of a single job
    Job(JobId),
}

impl QueueKey {
    /// Create a named queue key
    pub fn named(name: impl Into<String>) -> Self {
        QueueKey::Named(name.into())
    }
}

impl From<&str> for QueueKey {
    fn from(name: &str) -> Self {
        QueueKey::Named(name.to_string())
    }
}

impl From<String> for QueueKey {
    fn from(name: String) -> Self {
        QueueKey::Named(name)
    }
}

impl From<JobId> for QueueKey {
    fn from(id: JobId) -> Self {
        QueueKey::Job(id)
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKey::Named(name) => write!(f, "{name}"),
            QueueKey::Job(id) => write!(f, "job:{id}"),
        }
    }
}

// Serialised as a plain string so snapshots can use keys as JSON object keys.
impl Serialize for QueueKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A unit of work the coordinator can run
///
/// The coordinator only relies on the identity and on `perform` finishing
/// (successfully or not). Whatever the job does, and how it records its own
/// failure, is its own business.
#[async_trait]
pub trait Job: Send + Sync + fmt::Debug {
    /// Stable identity used for lookup, cancellation and the default queue key
    fn id(&self) -> JobId;

    /// Run the job to completion
    ///
    /// The future is dropped at its next await point when the job is killed.
    async fn perform(&self) -> anyhow::Result<()>;

    /// Human readable label for logs and snapshots
    fn describe(&self) -> String {
        self.id().to_string()
    }
}

/// Result of a `submit` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// The job was admitted and its worker started
    Started,
    /// The job waits in the backlog behind its key or the concurrency limit
    Queued,
    /// Execution is globally disabled; the job was dropped without effect
    Disabled,
}

impl Admission {
    /// Whether the job started immediately
    pub fn is_started(&self) -> bool {
        matches!(self, Admission::Started)
    }
}

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Killed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::Killed => "killed",
        }
    }
}

/// Point-in-time counts delivered to metrics sinks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Number of executing jobs (one per busy queue key)
    pub executing: usize,
    /// Number of pending jobs across all keys
    pub queued: usize,
}

/// An executing job as shown in snapshots
#[derive(Debug, Clone, Serialize)]
pub struct ExecutingJob {
    pub id: JobId,
    pub description: String,
    pub started_at: DateTime<Utc>,
}

/// A pending job as shown in snapshots
#[derive(Debug, Clone, Serialize)]
pub struct PendingJob {
    pub id: JobId,
    pub description: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Read-only view of the coordinator taken under its lock
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub enabled: bool,
    /// Current concurrency limit, `None` when unbounded
    pub max_concurrent: Option<usize>,
    pub executing: BTreeMap<QueueKey, ExecutingJob>,
    /// Pending jobs per key, oldest first
    pub pending: BTreeMap<QueueKey, Vec<PendingJob>>,
}

impl QueueSnapshot {
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            executing: self.executing.len(),
            queued: self.pending.values().map(Vec::len).sum(),
        }
    }
}

/// Shared handle to a job
pub type SharedJob = Arc<dyn Job>;
