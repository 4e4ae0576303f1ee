//! Evaluation harness
//!
//! Drives one candidate over a dataset, folding sandbox outcomes through the
//! caller's scorer. Partial-failure policy: a failed execution contributes
//! [`WORST_CASE_SCORE`] and the batch continues, so generated-code failures
//! never abort an evaluation.

use crate::example::{Candidate, Example};
use crate::metric::{AggregateMetric, EvaluationRecord};
use crate::runner::ProgramRunner;
use crate::scorer::{Scorer, WORST_CASE_SCORE};
use progopt_sandbox::{ExecutionLimits, ExecutionRequest, SandboxError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Resource policy applied to every run in a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Per-call resource limits
    pub limits: ExecutionLimits,
    /// Whether runs may reach external tools
    pub allow_network: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            limits: ExecutionLimits::default(),
            allow_network: false,
        }
    }
}

/// Shared, non-blocking view of a batch in flight
///
/// Updated by the harness after every example; safe to read from any number
/// of concurrent observers while the evaluation runs.
#[derive(Debug, Default)]
pub struct EvalProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl EvalProgress {
    /// Fresh progress handle
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Examples scored so far in the current batch
    #[inline]
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Size of the current batch
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    fn begin(&self, total: usize) {
        self.total.store(total, Ordering::Release);
        self.completed.store(0, Ordering::Release);
    }

    fn record_one(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Scores candidates against datasets through a [`ProgramRunner`]
#[derive(Clone)]
pub struct EvaluationHarness {
    runner: Arc<dyn ProgramRunner>,
}

impl EvaluationHarness {
    /// Harness over the given runner
    #[inline]
    #[must_use]
    pub fn new(runner: Arc<dyn ProgramRunner>) -> Self {
        Self { runner }
    }

    /// Evaluate one candidate over the dataset, in order
    ///
    /// # Errors
    /// Only host-level sandbox failures abort the batch; a program that
    /// times out, overruns memory, or raises is scored [`WORST_CASE_SCORE`]
    /// and the batch continues.
    pub async fn evaluate(
        &self,
        candidate: &Candidate,
        dataset: &[Example],
        scorer: &dyn Scorer,
        policy: RunPolicy,
        progress: &EvalProgress,
    ) -> Result<AggregateMetric, SandboxError> {
        progress.begin(dataset.len());
        let mut records = Vec::with_capacity(dataset.len());

        for example in dataset {
            let request = ExecutionRequest {
                code: candidate.source.clone(),
                input: example.input.clone(),
                limits: policy.limits,
                allow_network: policy.allow_network,
            };

            let result = self.runner.run(&request).await?;
            let score = if result.outcome.is_success() {
                scorer.score(example, &result)
            } else {
                tracing::debug!(
                    outcome = result.outcome.label(),
                    "example execution failed, scoring worst case"
                );
                WORST_CASE_SCORE
            };

            records.push(EvaluationRecord {
                input: example.input.clone(),
                expected: example.expected.clone(),
                result,
                score,
            });
            progress.record_one();
        }

        Ok(AggregateMetric::from_records(records))
    }
}
