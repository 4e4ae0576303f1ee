//! Job identity, status, and persisted records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique job identifier (ULID for sortability), stable across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Generate a new job id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
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

/// Job lifecycle status
///
/// `Succeeded`, `Failed`, and `Cancelled` are terminal: the worker never
/// leaves them on its own, though `Failed` and `Cancelled` jobs with a
/// checkpoint may be re-admitted through an explicit resume. Queued-ness is
/// a supervisor-level fact; a job waiting for admission is still `Pending`
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet admitted to a worker
    Pending,
    /// Worker loop active
    Running,
    /// Parked at an iteration boundary with a checkpoint
    Paused,
    /// Ran to completion
    Succeeded,
    /// Fatal error; last good checkpoint preserved
    Failed,
    /// Cooperatively cancelled; last good checkpoint preserved
    Cancelled,
}

impl JobStatus {
    /// Whether the status admits no further transitions
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Durable record of one job
///
/// The configuration is stored as a canonical JSON snapshot taken at
/// creation time, so later mutation of caller-side objects cannot affect a
/// running job. Once the status is terminal the record is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable job identity
    pub id: JobId,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Immutable configuration snapshot
    pub config: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// First admission time
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time
    pub finished_at: Option<DateTime<Utc>>,
    /// Completed iterations
    pub iteration: u32,
    /// Best aggregate score seen so far
    pub best_score: Option<f64>,
    /// Whether a checkpoint blob exists for this id
    pub has_checkpoint: bool,
    /// Human-readable outcome summary, set on every terminal transition
    pub summary: Option<String>,
    /// Error cause, set when `status` is `Failed`
    pub error: Option<String>,
}

impl JobRecord {
    /// Fresh `Pending` record with a config snapshot
    #[must_use]
    pub fn new(id: JobId, config: serde_json::Value) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            config,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            iteration: 0,
            best_score: None,
            has_checkpoint: false,
            summary: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn new_record_starts_pending() {
        let record = JobRecord::new(JobId::new(), serde_json::json!({"max_iterations": 3}));
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.iteration, 0);
        assert!(record.error.is_none());
        assert!(!record.has_checkpoint);
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = JobRecord::new(JobId::new(), serde_json::json!({"k": "v"}));
        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
