//! End-to-end job lifecycle against a file store and an in-memory runner.

use async_trait::async_trait;
use progopt_eval::{Example, ProgramRunner};
use progopt_jobs::{JobConfig, JobError, JobManager, JobSnapshot, JobSupervisor, StrategySpec};
use progopt_sandbox::{ExecutionOutcome, ExecutionRequest, ExecutionResult, SandboxError};
use progopt_store::{FileJobStore, JobStatus, JobStore};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runner that "executes" a candidate by parsing its source as a JSON
/// value, after an optional artificial delay. Counts calls so tests can
/// assert completed work is never redone.
struct ScriptedRunner {
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgramRunner for ScriptedRunner {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = match serde_json::from_str(&request.code) {
            Ok(value) => ExecutionOutcome::Success { value },
            Err(_) => ExecutionOutcome::RuntimeError {
                message: "bad candidate".to_string(),
            },
        };
        Ok(ExecutionResult {
            outcome,
            stdout: String::new(),
            stderr: String::new(),
            wall_time: self.delay,
            memory_cap_enforced: true,
        })
    }
}

fn dataset_expecting_42() -> Vec<Example> {
    vec![
        Example::new(serde_json::json!("a"), serde_json::json!(42)),
        Example::new(serde_json::json!("b"), serde_json::json!(42)),
    ]
}

fn sweep_config(max_iterations: u32, variants: &[&str]) -> JobConfig {
    JobConfig::new(
        max_iterations,
        dataset_expecting_42(),
        StrategySpec::variant_sweep(variants.iter().copied()),
    )
}

async fn open_manager(
    root: &Path,
    runner: Arc<ScriptedRunner>,
    capacity: usize,
) -> (JobManager, Arc<FileJobStore>) {
    let store = Arc::new(FileJobStore::open(root).await.unwrap());
    let supervisor = Arc::new(JobSupervisor::new(capacity));
    let manager = JobManager::new(store.clone(), runner, supervisor);
    (manager, store)
}

async fn wait_for<F>(manager: &JobManager, id: progopt_store::JobId, mut pred: F) -> JobSnapshot
where
    F: FnMut(&JobSnapshot) -> bool,
{
    for _ in 0..500 {
        let snapshot = manager.status(id).await.unwrap();
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn job_runs_to_success_and_persists_result() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, store) = open_manager(dir.path(), runner.clone(), 2).await;

    let id = manager
        .start(sweep_config(3, &["1", "42", "2"]))
        .await
        .unwrap();
    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;

    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert_eq!(snapshot.iteration, 3);
    assert_eq!(snapshot.best_score, Some(1.0));
    assert!(snapshot.summary.as_deref().unwrap().contains("best score"));
    // 3 iterations over 2 examples each.
    assert_eq!(runner.calls(), 6);

    let record = store.get(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert_eq!(record.iteration, 3);
    assert!(record.has_checkpoint);
    assert!(record.finished_at.is_some());

    let checkpoint = store.read_checkpoint(id).await.unwrap().unwrap();
    assert_eq!(checkpoint.iteration, 3);
    assert_eq!(checkpoint.best_candidate.unwrap().source, "42");
}

#[tokio::test]
async fn best_score_is_tracked_even_when_imperfect() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    // No variant ever matches the expected output.
    let id = manager.start(sweep_config(2, &["1", "2"])).await.unwrap();
    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;

    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert_eq!(snapshot.best_score, Some(0.0));
}

#[tokio::test]
async fn concurrency_cap_keeps_second_job_pending() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(25)));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    let first = manager.start(sweep_config(2, &["42"])).await.unwrap();
    let second = manager.start(sweep_config(2, &["42"])).await.unwrap();

    wait_for(&manager, first, |s| s.status == JobStatus::Running).await;
    let queued = manager.status(second).await.unwrap();
    assert_eq!(queued.status, JobStatus::Pending);

    // Both finish once the slot frees up.
    let s1 = wait_for(&manager, first, |s| s.status.is_terminal()).await;
    let s2 = wait_for(&manager, second, |s| s.status.is_terminal()).await;
    assert_eq!(s1.status, JobStatus::Succeeded);
    assert_eq!(s2.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn cancel_takes_effect_at_iteration_boundary_and_resume_continues() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(200)));
    let (manager, store) = open_manager(dir.path(), runner.clone(), 1).await;

    let id = manager.start(sweep_config(5, &["1", "42"])).await.unwrap();

    // Wait until iteration 2 is mid-flight (one completed iteration, one
    // example of the next batch already scored), then cancel.
    wait_for(&manager, id, |s| s.iteration == 1 && s.examples_completed == 1).await;
    manager.cancel(id).await.unwrap();

    // The in-flight iteration completes before the signal is observed.
    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert_eq!(snapshot.iteration, 2);
    assert_eq!(runner.calls(), 4);

    let checkpoint = store.read_checkpoint(id).await.unwrap().unwrap();
    assert_eq!(checkpoint.iteration, 2);

    // Resume picks up at iteration 3; iterations 1-2 are never re-scored.
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.resume(id).await.unwrap();
    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;
    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert_eq!(snapshot.iteration, 5);
    assert_eq!(snapshot.best_score, Some(1.0));
    assert_eq!(runner.calls(), 10);
}

#[tokio::test]
async fn pause_parks_with_checkpoint_and_resume_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(50)));
    let (manager, store) = open_manager(dir.path(), runner.clone(), 1).await;

    let id = manager.start(sweep_config(4, &["42"])).await.unwrap();
    wait_for(&manager, id, |s| s.iteration >= 1).await;
    manager.pause(id).await.unwrap();

    let paused = wait_for(&manager, id, |s| s.status == JobStatus::Paused).await;
    assert!(paused.iteration >= 1 && paused.iteration < 4);
    let parked_at = paused.iteration;

    let checkpoint = store.read_checkpoint(id).await.unwrap().unwrap();
    assert_eq!(checkpoint.iteration, parked_at);
    assert_eq!(store.get(id).await.unwrap().status, JobStatus::Paused);

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.resume(id).await.unwrap();
    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;
    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert_eq!(snapshot.iteration, 4);
    // Two examples per iteration, no iteration scored twice.
    assert_eq!(runner.calls(), 8);
}

#[tokio::test]
async fn paused_job_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id;
    let parked_at;
    {
        let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(50)));
        let (manager, _store) = open_manager(dir.path(), runner, 1).await;
        id = manager.start(sweep_config(4, &["42"])).await.unwrap();
        wait_for(&manager, id, |s| s.iteration >= 1).await;
        manager.pause(id).await.unwrap();
        parked_at = wait_for(&manager, id, |s| s.status == JobStatus::Paused)
            .await
            .iteration;
        // Manager dropped here; only the files on disk survive.
    }

    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, _store) = open_manager(dir.path(), runner.clone(), 1).await;

    // A fresh process answers status from the store.
    let recovered = manager.status(id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Paused);
    assert_eq!(recovered.iteration, parked_at);

    manager.resume(id).await.unwrap();
    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;
    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert_eq!(snapshot.iteration, 4);
    assert_eq!(runner.calls() as u32, (4 - parked_at) * 2);
}

#[tokio::test]
async fn iteration_count_is_monotonic_under_concurrent_readers() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(10)));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    let id = manager.start(sweep_config(5, &["42"])).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let snapshot = manager.status(id).await.unwrap();
        seen.push(snapshot.iteration);
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(*seen.last().unwrap(), 5);
}

#[tokio::test]
async fn invalid_configs_are_rejected_without_a_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, store) = open_manager(dir.path(), runner, 1).await;

    let err = manager.start(sweep_config(0, &["42"])).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidConfiguration(_)));

    let mut config = sweep_config(1, &["42"]);
    config.strategy = StrategySpec::new("does_not_exist", serde_json::Value::Null);
    let err = manager.start(config).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownStrategy(_)));

    // Nothing was persisted for either attempt.
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn status_of_unknown_id_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    let err = manager.status(progopt_store::JobId::new()).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
}

#[tokio::test]
async fn cancel_of_terminal_job_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    let id = manager.start(sweep_config(1, &["42"])).await.unwrap();
    wait_for(&manager, id, |s| s.status.is_terminal()).await;

    manager.cancel(id).await.unwrap();
    let snapshot = manager.status(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn succeeded_job_is_not_resumable() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    let id = manager.start(sweep_config(1, &["42"])).await.unwrap();
    wait_for(&manager, id, |s| s.status.is_terminal()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = manager.resume(id).await.unwrap_err();
    assert!(matches!(err, JobError::NotResumable { .. }));
}

#[tokio::test]
async fn checkpoint_from_a_different_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, store) = open_manager(dir.path(), runner, 1).await;

    let id = manager.start(sweep_config(2, &["42"])).await.unwrap();
    wait_for(&manager, id, |s| s.status.is_terminal()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Rewrite the stored record with a changed config and a resumable
    // status; the checkpoint's fingerprint no longer matches.
    let mut record = store.get(id).await.unwrap();
    record.status = JobStatus::Failed;
    record.config["max_iterations"] = serde_json::json!(7);
    store.update(&record).await.unwrap();

    let err = manager.resume(id).await.unwrap_err();
    assert!(
        matches!(&err, JobError::NotResumable { reason, .. } if reason.contains("configuration")),
        "{err}"
    );
}

#[tokio::test]
async fn orphaned_record_can_be_cancelled_directly() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, store) = open_manager(dir.path(), runner, 1).await;

    // A record left Running by a crashed process: no in-memory entry.
    let mut record = progopt_store::JobRecord::new(
        progopt_store::JobId::new(),
        serde_json::to_value(sweep_config(2, &["42"])).unwrap(),
    );
    store.create(&record).await.unwrap();
    record.status = JobStatus::Running;
    record.iteration = 1;
    store.update(&record).await.unwrap();

    manager.cancel(record.id).await.unwrap();
    let after = store.get(record.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert!(after.summary.as_deref().unwrap().contains("iteration 1"));
}

#[tokio::test]
async fn deadline_cancels_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(40)));
    let (manager, _store) = open_manager(dir.path(), runner, 1).await;

    let config = sweep_config(50, &["42"]).with_deadline(Duration::from_millis(120));
    let id = manager.start(config).await.unwrap();

    let snapshot = wait_for(&manager, id, |s| s.status.is_terminal()).await;
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert!(snapshot.iteration < 50);
    assert!(snapshot.summary.as_deref().unwrap().contains("deadline"));
}

#[tokio::test]
async fn list_jobs_merges_live_and_stored_views() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::ZERO));
    let (manager, _store) = open_manager(dir.path(), runner, 2).await;

    let a = manager.start(sweep_config(1, &["42"])).await.unwrap();
    let b = manager.start(sweep_config(1, &["1"])).await.unwrap();
    wait_for(&manager, a, |s| s.status.is_terminal()).await;
    wait_for(&manager, b, |s| s.status.is_terminal()).await;

    let listed = manager.list_jobs().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.status == JobStatus::Succeeded));
    assert!(listed.iter().any(|s| s.id == a));
    assert!(listed.iter().any(|s| s.id == b));
}

#[tokio::test]
async fn shutdown_parks_running_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(30)));
    let (manager, store) = open_manager(dir.path(), runner, 1).await;

    let id = manager.start(sweep_config(20, &["42"])).await.unwrap();
    wait_for(&manager, id, |s| s.iteration >= 1).await;

    manager.shutdown().await;

    let record = store.get(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.has_checkpoint);
}
