//! Job manager
//!
//! The public control surface over jobs: start, status, pause, resume,
//! cancel, list. Durable state lives behind a [`JobStore`]; admission goes
//! through a [`JobSupervisor`]; proposal strategies are rebound by name
//! through a [`StrategyRegistry`], which is what makes resume possible after
//! a process restart.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::snapshot::{ControlFlags, JobSnapshot, StatusCell};
use crate::state::validate_transition;
use crate::strategy::{OptimizationStrategy, StrategyRegistry};
use crate::supervisor::JobSupervisor;
use crate::worker::{self, WorkerEnv, WorkerSpec};
use chrono::Utc;
use dashmap::DashMap;
use progopt_eval::{Candidate, EvalProgress, EvaluationHarness, ProgramRunner, WORST_CASE_SCORE};
use progopt_store::{config_fingerprint, JobId, JobRecord, JobStatus, JobStore, StoreError};
use std::sync::Arc;

struct JobEntry {
    cell: Arc<StatusCell>,
    flags: Arc<ControlFlags>,
    progress: Arc<EvalProgress>,
}

/// Manages the lifecycle of optimization jobs
pub struct JobManager {
    store: Arc<dyn JobStore>,
    harness: EvaluationHarness,
    supervisor: Arc<JobSupervisor>,
    registry: StrategyRegistry,
    /// Live workers only; entries are evicted when the worker exits and
    /// `status` falls back to the store.
    jobs: Arc<DashMap<JobId, JobEntry>>,
}

impl JobManager {
    /// Manager with the built-in strategy registry
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn ProgramRunner>,
        supervisor: Arc<JobSupervisor>,
    ) -> Self {
        Self {
            store,
            harness: EvaluationHarness::new(runner),
            supervisor,
            registry: StrategyRegistry::with_defaults(),
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Replace the strategy registry
    #[must_use]
    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Create and enqueue a new optimization job
    ///
    /// The configuration is validated and snapshotted before the id is
    /// returned, so a returned id always has a durable `Pending` record
    /// behind it. If the concurrency cap is reached the job waits in FIFO
    /// order and stays `Pending` until admitted.
    ///
    /// # Errors
    /// `InvalidConfiguration` or `UnknownStrategy` without allocating an id;
    /// `Storage` when the record cannot be persisted.
    pub async fn start(&self, config: JobConfig) -> Result<JobId, JobError> {
        config.validate()?;
        let strategy = self.registry.build(&config.strategy)?;
        let config_json = serde_json::to_value(&config)
            .map_err(|e| JobError::InvalidConfiguration(e.to_string()))?;
        let fingerprint = config_fingerprint(&config_json);

        let id = JobId::new();
        self.store.create(&JobRecord::new(id, config_json)).await?;
        tracing::info!(job_id = %id, strategy = %config.strategy.name, "job created");
        self.launch(id, config, fingerprint, strategy, 0, None)?;
        Ok(id)
    }

    /// Current snapshot of one job
    ///
    /// Never blocks on a running evaluation. Jobs without an in-process
    /// worker (after a restart, say) are answered from the store.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    pub async fn status(&self, id: JobId) -> Result<JobSnapshot, JobError> {
        if let Some(entry) = self.jobs.get(&id) {
            return Ok(entry.cell.snapshot(id, &entry.progress));
        }
        let record = self.store.get(id).await.map_err(|e| not_found(id, e))?;
        Ok(JobSnapshot::from_record(&record))
    }

    /// Request cooperative cancellation
    ///
    /// Takes effect at the worker's next safe point; the in-flight sandbox
    /// call completes first. Cancelling a terminal job is a no-op, and the
    /// last successful checkpoint is preserved either way.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let live = self
            .jobs
            .get(&id)
            .map(|entry| (entry.cell.status(), entry.flags.clone()));
        if let Some((status, flags)) = live {
            if status.is_terminal() {
                return Ok(());
            }
            if status != JobStatus::Paused {
                tracing::info!(job_id = %id, "cancellation requested");
                flags.request_cancel();
                return Ok(());
            }
            // Paused jobs have no worker to observe the flag; fall through
            // to the store path.
        }

        let mut record = self.store.get(id).await.map_err(|e| not_found(id, e))?;
        if record.status.is_terminal() {
            return Ok(());
        }
        validate_transition(record.status, JobStatus::Cancelled)?;
        let summary = format!("cancelled at iteration {}", record.iteration);
        record.status = JobStatus::Cancelled;
        record.finished_at = Some(Utc::now());
        record.summary = Some(summary.clone());
        self.store.update(&record).await?;
        if let Some(entry) = self.jobs.get(&id) {
            entry.cell.set_terminal(JobStatus::Cancelled, summary);
        }
        tracing::info!(job_id = %id, "job without live worker marked cancelled");
        Ok(())
    }

    /// Request a pause at the worker's next safe point
    ///
    /// The worker writes a checkpoint before parking, so a paused job is
    /// always resumable. Pausing a terminal job is a no-op.
    ///
    /// # Errors
    /// `NotFound` for an unknown id; `NotRunning` when the job has no live
    /// worker to park.
    pub async fn pause(&self, id: JobId) -> Result<(), JobError> {
        if let Some(entry) = self.jobs.get(&id) {
            if entry.cell.status().is_terminal() {
                return Ok(());
            }
            tracing::info!(job_id = %id, "pause requested");
            entry.flags.request_pause();
            return Ok(());
        }
        // Existence check so the caller can tell "unknown" from "not live".
        self.store.get(id).await.map_err(|e| not_found(id, e))?;
        Err(JobError::NotRunning(id))
    }

    /// Resume a paused job, or a failed or cancelled one that holds a
    /// checkpoint
    ///
    /// The strategy is rebuilt from the stored config snapshot, its state
    /// restored from the checkpoint, and the worker re-admitted at
    /// `checkpoint.iteration`; completed iterations are never re-scored.
    ///
    /// # Errors
    /// `AlreadyRunning` when a worker is admitted or queued; `NotResumable`
    /// when the status, checkpoint, or config fingerprint rule a resume out.
    pub async fn resume(&self, id: JobId) -> Result<(), JobError> {
        if self.supervisor.is_tracked(id) {
            return Err(JobError::AlreadyRunning(id));
        }
        let record = self.store.get(id).await.map_err(|e| not_found(id, e))?;
        match record.status {
            JobStatus::Paused => {}
            JobStatus::Failed | JobStatus::Cancelled if record.has_checkpoint => {}
            status => {
                return Err(JobError::NotResumable {
                    id,
                    reason: format!("status is {status}"),
                });
            }
        }

        let checkpoint = match self.store.read_checkpoint(id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                return Err(JobError::NotResumable {
                    id,
                    reason: "no checkpoint on record".to_string(),
                });
            }
            Err(StoreError::Corrupt(e)) => {
                return Err(JobError::NotResumable {
                    id,
                    reason: format!("checkpoint unreadable: {e}"),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let fingerprint = config_fingerprint(&record.config);
        if !checkpoint.is_compatible_with(&fingerprint) {
            return Err(JobError::NotResumable {
                id,
                reason: "checkpoint was written under a different configuration".to_string(),
            });
        }

        let config: JobConfig =
            serde_json::from_value(record.config.clone()).map_err(|e| JobError::NotResumable {
                id,
                reason: format!("stored configuration unreadable: {e}"),
            })?;
        let mut strategy = self.registry.build(&config.strategy)?;
        strategy.restore(&checkpoint.strategy_state);
        let best = checkpoint
            .best_candidate
            .clone()
            .map(|candidate| (candidate, checkpoint.best_score.unwrap_or(WORST_CASE_SCORE)));

        tracing::info!(job_id = %id, iteration = checkpoint.iteration, "resuming job from checkpoint");
        self.launch(
            id,
            config,
            fingerprint,
            strategy,
            checkpoint.iteration,
            best,
        )
    }

    /// Snapshots of every known job, live ones answered from memory
    ///
    /// # Errors
    /// `Storage` when the store cannot be listed.
    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, JobError> {
        let records = self.store.list().await?;
        Ok(records
            .iter()
            .map(|record| match self.jobs.get(&record.id) {
                Some(entry) => entry.cell.snapshot(record.id, &entry.progress),
                None => JobSnapshot::from_record(record),
            })
            .collect())
    }

    /// Cancel every tracked job and wait for workers to park their state
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    fn launch(
        &self,
        id: JobId,
        config: JobConfig,
        fingerprint: String,
        strategy: Box<dyn OptimizationStrategy>,
        start_iteration: u32,
        best: Option<(Candidate, f64)>,
    ) -> Result<(), JobError> {
        let flags = Arc::new(ControlFlags::default());
        let cell = Arc::new(StatusCell::new(
            start_iteration,
            best.as_ref().map(|(_, score)| *score),
        ));
        let progress = Arc::new(EvalProgress::new());
        self.jobs.insert(
            id,
            JobEntry {
                cell: cell.clone(),
                flags: flags.clone(),
                progress: progress.clone(),
            },
        );

        let env = WorkerEnv {
            store: self.store.clone(),
            harness: self.harness.clone(),
        };
        let spec = WorkerSpec {
            id,
            config,
            fingerprint,
            strategy,
            start_iteration,
            best,
            flags: flags.clone(),
            cell,
            progress,
        };
        let jobs = self.jobs.clone();
        let work = Box::pin(async move {
            worker::run(env, spec).await;
            // The durable record is terminal (or paused) by now; keeping the
            // entry would only grow the map for the life of the process.
            jobs.remove(&id);
        });
        if let Err(e) = self.supervisor.submit(id, flags, work) {
            self.jobs.remove(&id);
            return Err(e);
        }
        Ok(())
    }
}

fn not_found(id: JobId, e: StoreError) -> JobError {
    match e {
        StoreError::NotFound => JobError::NotFound(id),
        other => JobError::Storage(other),
    }
}
