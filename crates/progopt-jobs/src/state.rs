//! Job lifecycle transition table
//!
//! Workers and the manager funnel every status change through
//! [`validate_transition`], so an out-of-order update is an error instead of
//! silent corruption. Terminal states admit no worker-driven exits; the only
//! re-entries are explicit resumes of `Failed` or `Cancelled` jobs that hold
//! a checkpoint.

use crate::error::JobError;
use progopt_store::JobStatus;

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: JobStatus) -> &'static [JobStatus] {
    match from {
        JobStatus::Pending => &[JobStatus::Running, JobStatus::Cancelled],
        JobStatus::Running => &[
            JobStatus::Paused,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ],
        JobStatus::Paused => &[JobStatus::Running, JobStatus::Cancelled],
        JobStatus::Succeeded => &[],
        // Resume re-entry only; nothing else leaves a terminal state.
        JobStatus::Failed | JobStatus::Cancelled => &[JobStatus::Running],
    }
}

/// Check one status change against the lifecycle table
///
/// # Errors
/// `InvalidTransition` when the change is not in the table.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(JobError::InvalidTransition { from, to })
    }
}
