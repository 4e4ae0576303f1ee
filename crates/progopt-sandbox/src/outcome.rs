//! Structured execution outcomes
//!
//! Every sandbox run ends in exactly one [`ExecutionOutcome`]. An abnormal
//! child exit is a `RuntimeError` carrying the captured stderr; it is never
//! reported as a success with a null value.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification of a single execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Program exited cleanly; `value` is its parsed return value
    Success { value: serde_json::Value },
    /// Program raised or exited abnormally
    RuntimeError { message: String },
    /// Watchdog killed the program at the wall-clock limit
    Timeout,
    /// Kernel or limit enforcement killed the program at the memory cap
    ResourceLimit,
}

impl ExecutionOutcome {
    /// Whether the run produced a usable return value
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short label for logs and summaries
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RuntimeError { .. } => "runtime_error",
            Self::Timeout => "timeout",
            Self::ResourceLimit => "resource_limit",
        }
    }
}

/// Immutable result of one sandbox execution
///
/// Consumed by the evaluation harness; a retry is always a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Outcome classification (exactly one per run)
    pub outcome: ExecutionOutcome,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Wall-clock time the run took
    pub wall_time: Duration,
    /// Whether the memory cap was actually enforced on this host
    pub memory_cap_enforced: bool,
}

impl ExecutionResult {
    /// Return value, if the run succeeded
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            ExecutionOutcome::Success { value } => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(
            ExecutionOutcome::Success {
                value: serde_json::Value::Null
            }
            .label(),
            "success"
        );
        assert_eq!(ExecutionOutcome::Timeout.label(), "timeout");
        assert_eq!(ExecutionOutcome::ResourceLimit.label(), "resource_limit");
        assert_eq!(
            ExecutionOutcome::RuntimeError {
                message: "boom".into()
            }
            .label(),
            "runtime_error"
        );
    }

    #[test]
    fn null_success_is_still_success() {
        // A success carrying null must stay distinct from a runtime error.
        let outcome = ExecutionOutcome::Success {
            value: serde_json::Value::Null,
        };
        assert!(outcome.is_success());
    }
}
