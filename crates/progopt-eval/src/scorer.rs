//! Scoring functions

use crate::example::Example;
use progopt_sandbox::ExecutionResult;

/// Score contributed by a failed execution
pub const WORST_CASE_SCORE: f64 = 0.0;

/// Caller-supplied scoring function
///
/// Only invoked for successful executions; the harness assigns
/// [`WORST_CASE_SCORE`] to failures before the scorer ever sees them.
pub trait Scorer: Send + Sync {
    /// Score one example's result in `[0.0, 1.0]`
    fn score(&self, example: &Example, result: &ExecutionResult) -> f64;
}

/// Exact equality against the example's expected output
///
/// An example without an expected output scores 1.0 for any successful run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatchScorer;

impl Scorer for ExactMatchScorer {
    fn score(&self, example: &Example, result: &ExecutionResult) -> f64 {
        match (&example.expected, result.value()) {
            (Some(expected), Some(actual)) if expected == actual => 1.0,
            (Some(_), _) => 0.0,
            (None, _) => 1.0,
        }
    }
}
