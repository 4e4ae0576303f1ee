//! Evaluation records and aggregate metrics

use progopt_sandbox::ExecutionResult;
use serde::{Deserialize, Serialize};

/// One scored example
///
/// Immutable once produced; failed executions appear here with the
/// worst-case score so the aggregate is always computable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Input payload of the example
    pub input: serde_json::Value,
    /// Expected output, if the example carried one
    pub expected: Option<serde_json::Value>,
    /// Full execution result for the example
    pub result: ExecutionResult,
    /// Score assigned to this example
    pub score: f64,
}

/// Aggregate over one candidate's evaluation batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetric {
    /// Mean score over the batch (0.0 for an empty batch)
    pub mean_score: f64,
    /// Per-example records, in dataset order
    pub records: Vec<EvaluationRecord>,
    /// Number of examples whose execution failed
    pub failures: usize,
}

impl AggregateMetric {
    /// Fold a batch of records into an aggregate
    #[must_use]
    pub fn from_records(records: Vec<EvaluationRecord>) -> Self {
        let failures = records
            .iter()
            .filter(|r| !r.result.outcome.is_success())
            .count();
        let mean_score = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.score).sum::<f64>() / records.len() as f64
        };
        Self {
            mean_score,
            records,
            failures,
        }
    }
}
