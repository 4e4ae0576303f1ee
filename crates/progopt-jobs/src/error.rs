//! Job layer errors

use progopt_sandbox::SandboxError;
use progopt_store::{JobId, JobStatus, StoreError};

/// Job management failure
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Configuration rejected before a job id was allocated
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Strategy name has no registered builder
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    /// The job already has an admitted or queued worker
    #[error("job {0} is already running")]
    AlreadyRunning(JobId),

    /// No record for the given job id
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The operation needs a live worker and the job has none
    #[error("job {0} is not running")]
    NotRunning(JobId),

    /// Resume preconditions not met (wrong status, missing or
    /// incompatible checkpoint)
    #[error("job {id} cannot be resumed: {reason}")]
    NotResumable { id: JobId, reason: String },

    /// Status transition not in the lifecycle table
    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Strategy-internal failure during proposal
    #[error("strategy failure: {0}")]
    Strategy(String),

    /// Durable state could not be read or written
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Host-level sandbox failure (program misbehavior is scored, not
    /// raised)
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}
