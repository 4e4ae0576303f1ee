//! Job configuration

use crate::error::JobError;
use crate::strategy::StrategySpec;
use progopt_eval::{Example, RunPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_checkpoint_interval() -> u32 {
    1
}

/// Everything needed to run one optimization job
///
/// Serializable so the manager can snapshot it into the job record at
/// creation time and rebuild the strategy from the snapshot on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Upper bound on optimization iterations
    pub max_iterations: u32,
    /// Examples every candidate is scored against, in order
    pub dataset: Vec<Example>,
    /// Strategy selection, resolved through the manager's registry
    pub strategy: StrategySpec,
    /// Resource policy applied to every sandbox run
    #[serde(default)]
    pub policy: RunPolicy,
    /// Checkpoint cadence in iterations
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
    /// Wall-clock budget from first admission; exceeding it cancels the job
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl JobConfig {
    /// Config with default policy, per-iteration checkpoints, and no
    /// deadline
    #[must_use]
    pub fn new(max_iterations: u32, dataset: Vec<Example>, strategy: StrategySpec) -> Self {
        Self {
            max_iterations,
            dataset,
            strategy,
            policy: RunPolicy::default(),
            checkpoint_interval: default_checkpoint_interval(),
            deadline: None,
        }
    }

    /// Set the sandbox policy
    #[must_use]
    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the checkpoint cadence
    #[must_use]
    pub fn with_checkpoint_interval(mut self, iterations: u32) -> Self {
        self.checkpoint_interval = iterations;
        self
    }

    /// Set a wall-clock deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Reject configs that cannot produce a well-formed job
    ///
    /// # Errors
    /// `InvalidConfiguration` naming the first offending field.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.max_iterations == 0 {
            return Err(JobError::InvalidConfiguration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.dataset.is_empty() {
            return Err(JobError::InvalidConfiguration(
                "dataset must contain at least one example".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(JobError::InvalidConfiguration(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.policy.limits.time_limit.is_zero() {
            return Err(JobError::InvalidConfiguration(
                "time limit must be positive".to_string(),
            ));
        }
        if self.policy.limits.memory_limit_bytes == 0 {
            return Err(JobError::InvalidConfiguration(
                "memory limit must be positive".to_string(),
            ));
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(JobError::InvalidConfiguration(
                "deadline must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
