//! Per-job worker loop
//!
//! One task per admitted job: propose a candidate, evaluate it over the
//! dataset, keep the strictly best result, checkpoint at the configured
//! cadence, and repeat. Control signals (cancel, pause, deadline) are only
//! observed between iterations, so an in-flight evaluation always completes
//! and the recorded iteration count is exact.
//!
//! Store calls are retried a bounded number of times with doubling delays;
//! a store that stays down fails the job rather than wedging it.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::snapshot::{ControlFlags, StatusCell};
use crate::state::validate_transition;
use crate::strategy::{OptimizationStrategy, StrategyScorer};
use chrono::Utc;
use progopt_eval::{Candidate, EvalProgress, EvaluationHarness};
use progopt_store::{
    Checkpoint, JobId, JobRecord, JobStatus, JobStore, StoreError, CHECKPOINT_VERSION,
};
use std::sync::Arc;
use std::time::Duration;

/// Attempts per store call before the failure escalates
const STORE_ATTEMPTS: u32 = 3;
/// First retry delay; doubles per attempt
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

pub(crate) struct WorkerEnv {
    pub store: Arc<dyn JobStore>,
    pub harness: EvaluationHarness,
}

pub(crate) struct WorkerSpec {
    pub id: JobId,
    pub config: JobConfig,
    pub fingerprint: String,
    pub strategy: Box<dyn OptimizationStrategy>,
    pub start_iteration: u32,
    pub best: Option<(Candidate, f64)>,
    pub flags: Arc<ControlFlags>,
    pub cell: Arc<StatusCell>,
    pub progress: Arc<EvalProgress>,
}

pub(crate) async fn run(env: WorkerEnv, mut spec: WorkerSpec) {
    let id = spec.id;
    let mut record = match retry_get(env.store.as_ref(), id).await {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "job record unavailable, worker aborting");
            spec.cell
                .set_terminal(JobStatus::Failed, format!("job record unavailable: {e}"));
            return;
        }
    };

    if let Err(e) = mark_running(&env, &mut record).await {
        fail(
            &env,
            &mut record,
            &spec.cell,
            format!("could not mark job running: {e}"),
        )
        .await;
        return;
    }
    spec.cell.set_status(JobStatus::Running);
    tracing::info!(
        job_id = %id,
        start_iteration = spec.start_iteration,
        max_iterations = spec.config.max_iterations,
        "worker started"
    );

    let mut best = spec.best.take();
    let mut iteration = spec.start_iteration;

    while iteration < spec.config.max_iterations {
        // Safe point: control signals are observed only here, never
        // mid-evaluation.
        if spec.flags.cancel_requested() {
            park_cancelled(&env, &mut record, &spec, iteration, &best, "cancelled by caller").await;
            return;
        }
        if deadline_exceeded(&record, &spec.config) {
            park_cancelled(&env, &mut record, &spec, iteration, &best, "deadline exceeded").await;
            return;
        }
        if spec.flags.pause_requested() {
            park_paused(&env, &mut record, &spec, iteration, &best).await;
            return;
        }

        let candidate = match spec
            .strategy
            .propose(best.as_ref().map(|(c, _)| c), iteration)
        {
            Ok(candidate) => candidate,
            Err(e) => {
                fail(
                    &env,
                    &mut record,
                    &spec.cell,
                    format!("strategy proposal failed: {e}"),
                )
                .await;
                return;
            }
        };

        let metric = {
            let scorer = StrategyScorer(spec.strategy.as_ref());
            match env
                .harness
                .evaluate(
                    &candidate,
                    &spec.config.dataset,
                    &scorer,
                    spec.config.policy,
                    &spec.progress,
                )
                .await
            {
                Ok(metric) => metric,
                Err(e) => {
                    fail(
                        &env,
                        &mut record,
                        &spec.cell,
                        format!("sandbox host failure: {e}"),
                    )
                    .await;
                    return;
                }
            }
        };

        iteration += 1;
        // Strict improvement only, so ties keep the earliest winner.
        let improved = best
            .as_ref()
            .map_or(true, |(_, score)| metric.mean_score > *score);
        if improved {
            tracing::debug!(job_id = %id, iteration, score = metric.mean_score, "new best candidate");
            best = Some((candidate, metric.mean_score));
        }

        record.iteration = iteration;
        record.best_score = best.as_ref().map(|(_, score)| *score);
        spec.cell.set_progress(iteration, record.best_score);

        if iteration % spec.config.checkpoint_interval == 0
            || iteration == spec.config.max_iterations
        {
            let checkpoint = build_checkpoint(&spec, iteration, &best);
            if let Err(e) = retry_checkpoint(env.store.as_ref(), id, &checkpoint).await {
                fail(
                    &env,
                    &mut record,
                    &spec.cell,
                    format!("checkpoint write failed: {e}"),
                )
                .await;
                return;
            }
            record.has_checkpoint = true;
        }
        if let Err(e) = retry_update(env.store.as_ref(), &record).await {
            fail(
                &env,
                &mut record,
                &spec.cell,
                format!("storage unavailable: {e}"),
            )
            .await;
            return;
        }
    }

    let summary = match &best {
        Some((_, score)) => format!("completed {iteration} iteration(s), best score {score:.3}"),
        None => format!("completed {iteration} iteration(s)"),
    };
    match finalize(&env, &mut record, JobStatus::Succeeded, summary.clone()).await {
        Ok(()) => {
            spec.cell.set_terminal(JobStatus::Succeeded, summary);
            tracing::info!(job_id = %id, iteration, "job succeeded");
        }
        Err(e) => {
            spec.cell.set_terminal(
                JobStatus::Failed,
                format!("could not persist terminal state: {e}"),
            );
            tracing::error!(job_id = %id, error = %e, "could not persist succeeded state");
        }
    }
}

async fn mark_running(env: &WorkerEnv, record: &mut JobRecord) -> Result<(), JobError> {
    validate_transition(record.status, JobStatus::Running)?;
    record.status = JobStatus::Running;
    if record.started_at.is_none() {
        record.started_at = Some(Utc::now());
    }
    // Resume re-entry clears the previous terminal stamp.
    record.finished_at = None;
    record.summary = None;
    record.error = None;
    retry_update(env.store.as_ref(), record).await?;
    Ok(())
}

async fn finalize(
    env: &WorkerEnv,
    record: &mut JobRecord,
    status: JobStatus,
    summary: String,
) -> Result<(), JobError> {
    validate_transition(record.status, status)?;
    record.status = status;
    record.finished_at = Some(Utc::now());
    if status == JobStatus::Failed {
        record.error = Some(summary.clone());
    }
    record.summary = Some(summary);
    retry_update(env.store.as_ref(), record).await?;
    Ok(())
}

async fn fail(env: &WorkerEnv, record: &mut JobRecord, cell: &StatusCell, summary: String) {
    tracing::error!(job_id = %record.id, error = %summary, "job failed");
    if let Err(e) = finalize(env, record, JobStatus::Failed, summary.clone()).await {
        tracing::error!(job_id = %record.id, error = %e, "could not persist failed state");
    }
    cell.set_terminal(JobStatus::Failed, summary);
}

async fn park_cancelled(
    env: &WorkerEnv,
    record: &mut JobRecord,
    spec: &WorkerSpec,
    iteration: u32,
    best: &Option<(Candidate, f64)>,
    reason: &str,
) {
    let summary = format!("{reason} at iteration {iteration}");
    // Checkpoint current progress so a later resume continues from here; if
    // the write fails the last good checkpoint stays in place.
    let checkpoint = build_checkpoint(spec, iteration, best);
    match retry_checkpoint(env.store.as_ref(), record.id, &checkpoint).await {
        Ok(()) => record.has_checkpoint = true,
        Err(e) => {
            tracing::warn!(job_id = %record.id, error = %e, "final checkpoint failed, keeping last good one");
        }
    }
    if let Err(e) = finalize(env, record, JobStatus::Cancelled, summary.clone()).await {
        tracing::error!(job_id = %record.id, error = %e, "could not persist cancelled state");
    }
    spec.cell.set_terminal(JobStatus::Cancelled, summary);
    tracing::info!(job_id = %record.id, iteration, reason, "job cancelled");
}

async fn park_paused(
    env: &WorkerEnv,
    record: &mut JobRecord,
    spec: &WorkerSpec,
    iteration: u32,
    best: &Option<(Candidate, f64)>,
) {
    // A pause without a checkpoint would be unresumable, so a failed write
    // fails the job instead.
    let checkpoint = build_checkpoint(spec, iteration, best);
    if let Err(e) = retry_checkpoint(env.store.as_ref(), record.id, &checkpoint).await {
        fail(
            env,
            record,
            &spec.cell,
            format!("pause checkpoint failed: {e}"),
        )
        .await;
        return;
    }
    record.has_checkpoint = true;

    if let Err(e) = validate_transition(record.status, JobStatus::Paused) {
        fail(env, record, &spec.cell, e.to_string()).await;
        return;
    }
    record.status = JobStatus::Paused;
    if let Err(e) = retry_update(env.store.as_ref(), record).await {
        fail(
            env,
            record,
            &spec.cell,
            format!("storage unavailable: {e}"),
        )
        .await;
        return;
    }
    spec.cell.set_status(JobStatus::Paused);
    tracing::info!(job_id = %record.id, iteration, "job paused");
}

fn build_checkpoint(
    spec: &WorkerSpec,
    iteration: u32,
    best: &Option<(Candidate, f64)>,
) -> Checkpoint {
    Checkpoint {
        version: CHECKPOINT_VERSION,
        config_fingerprint: spec.fingerprint.clone(),
        iteration,
        best_candidate: best.as_ref().map(|(candidate, _)| candidate.clone()),
        best_score: best.as_ref().map(|(_, score)| *score),
        strategy_state: spec.strategy.state(),
    }
}

fn deadline_exceeded(record: &JobRecord, config: &JobConfig) -> bool {
    let (Some(deadline), Some(started_at)) = (config.deadline, record.started_at) else {
        return false;
    };
    match chrono::Duration::from_std(deadline) {
        Ok(budget) => Utc::now() - started_at > budget,
        Err(_) => false,
    }
}

async fn retry_get(store: &dyn JobStore, id: JobId) -> Result<JobRecord, StoreError> {
    let mut delay = STORE_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match store.get(id).await {
            Ok(record) => return Ok(record),
            Err(e) if e.is_retryable() && attempt < STORE_ATTEMPTS => {
                tracing::warn!(job_id = %id, attempt, error = %e, "store read failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn retry_update(store: &dyn JobStore, record: &JobRecord) -> Result<(), StoreError> {
    let mut delay = STORE_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match store.update(record).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < STORE_ATTEMPTS => {
                tracing::warn!(job_id = %record.id, attempt, error = %e, "record update failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn retry_checkpoint(
    store: &dyn JobStore,
    id: JobId,
    checkpoint: &Checkpoint,
) -> Result<(), StoreError> {
    let mut delay = STORE_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match store.write_checkpoint(id, checkpoint).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < STORE_ATTEMPTS => {
                tracing::warn!(job_id = %id, attempt, error = %e, "checkpoint write failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_only_counts_after_start() {
        let config = JobConfig::new(
            1,
            vec![progopt_eval::Example::unchecked(serde_json::json!(1))],
            crate::strategy::StrategySpec::variant_sweep(["1"]),
        )
        .with_deadline(Duration::from_millis(1));

        let mut record = JobRecord::new(JobId::new(), serde_json::json!({}));
        assert!(!deadline_exceeded(&record, &config));

        record.started_at = Some(Utc::now() - chrono::Duration::seconds(10));
        assert!(deadline_exceeded(&record, &config));
    }

    #[test]
    fn no_deadline_never_expires() {
        let config = JobConfig::new(
            1,
            vec![progopt_eval::Example::unchecked(serde_json::json!(1))],
            crate::strategy::StrategySpec::variant_sweep(["1"]),
        );
        let mut record = JobRecord::new(JobId::new(), serde_json::json!({}));
        record.started_at = Some(Utc::now() - chrono::Duration::days(365));
        assert!(!deadline_exceeded(&record, &config));
    }
}
