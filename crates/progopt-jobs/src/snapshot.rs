//! In-memory job status and control signals

use progopt_eval::EvalProgress;
use progopt_store::{JobId, JobRecord, JobStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of one job
///
/// For jobs with a live worker the view comes from memory and includes
/// partial progress of the evaluation batch in flight; otherwise it is
/// reconstructed from the durable record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    /// Job identity
    pub id: JobId,
    /// Lifecycle status
    pub status: JobStatus,
    /// Completed iterations; never decreases across successive reads
    pub iteration: u32,
    /// Best aggregate score seen so far
    pub best_score: Option<f64>,
    /// Examples scored in the evaluation batch currently in flight
    pub examples_completed: usize,
    /// Size of that batch
    pub examples_total: usize,
    /// Wall-clock time since the job started
    pub elapsed: Duration,
    /// Outcome summary, present once the job is terminal
    pub summary: Option<String>,
}

impl JobSnapshot {
    /// Snapshot reconstructed from a durable record (no live worker)
    #[must_use]
    pub fn from_record(record: &JobRecord) -> Self {
        let start = record.started_at.unwrap_or(record.created_at);
        let end = record.finished_at.unwrap_or_else(chrono::Utc::now);
        Self {
            id: record.id,
            status: record.status,
            iteration: record.iteration,
            best_score: record.best_score,
            examples_completed: 0,
            examples_total: 0,
            elapsed: (end - start).to_std().unwrap_or_default(),
            summary: record.summary.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CellState {
    status: JobStatus,
    iteration: u32,
    best_score: Option<f64>,
    summary: Option<String>,
}

/// Live status for a job with an in-process worker
///
/// Iteration and best score change together under one lock, so any number
/// of concurrent readers see a consistent pair without ever waiting on the
/// sandbox.
#[derive(Debug)]
pub(crate) struct StatusCell {
    started: Instant,
    inner: parking_lot::Mutex<CellState>,
}

impl StatusCell {
    pub(crate) fn new(iteration: u32, best_score: Option<f64>) -> Self {
        Self {
            started: Instant::now(),
            inner: parking_lot::Mutex::new(CellState {
                status: JobStatus::Pending,
                iteration,
                best_score,
                summary: None,
            }),
        }
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.inner.lock().status
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        self.inner.lock().status = status;
    }

    pub(crate) fn set_progress(&self, iteration: u32, best_score: Option<f64>) {
        let mut state = self.inner.lock();
        state.iteration = iteration;
        state.best_score = best_score;
    }

    pub(crate) fn set_terminal(&self, status: JobStatus, summary: String) {
        let mut state = self.inner.lock();
        state.status = status;
        state.summary = Some(summary);
    }

    pub(crate) fn snapshot(&self, id: JobId, progress: &EvalProgress) -> JobSnapshot {
        let state = self.inner.lock().clone();
        JobSnapshot {
            id,
            status: state.status,
            iteration: state.iteration,
            best_score: state.best_score,
            examples_completed: progress.completed(),
            examples_total: progress.total(),
            elapsed: self.started.elapsed(),
            summary: state.summary,
        }
    }
}

/// Cooperative control signals, observed by the worker at iteration
/// boundaries
#[derive(Debug, Default)]
pub(crate) struct ControlFlags {
    cancel: AtomicBool,
    pause: AtomicBool,
}

impl ControlFlags {
    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn request_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_from_record_carries_progress() {
        let mut record = JobRecord::new(JobId::new(), serde_json::json!({}));
        record.iteration = 4;
        record.best_score = Some(0.75);
        record.status = JobStatus::Paused;

        let snapshot = JobSnapshot::from_record(&record);
        assert_eq!(snapshot.status, JobStatus::Paused);
        assert_eq!(snapshot.iteration, 4);
        assert_eq!(snapshot.best_score, Some(0.75));
        assert_eq!(snapshot.examples_total, 0);
    }

    #[test]
    fn cell_updates_are_read_back_consistently() {
        let cell = StatusCell::new(0, None);
        cell.set_status(JobStatus::Running);
        cell.set_progress(2, Some(0.5));

        let snapshot = cell.snapshot(JobId::new(), &EvalProgress::new());
        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(snapshot.iteration, 2);
        assert_eq!(snapshot.best_score, Some(0.5));
    }

    #[test]
    fn flags_start_clear() {
        let flags = ControlFlags::default();
        assert!(!flags.cancel_requested());
        assert!(!flags.pause_requested());
        flags.request_pause();
        assert!(flags.pause_requested());
        assert!(!flags.cancel_requested());
    }
}
