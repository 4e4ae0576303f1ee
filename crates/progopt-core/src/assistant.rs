//! Assistant facade
//!
//! One entry point over the whole stack. Ad-hoc runs go
//! validate-then-execute; optimization jobs go through the job manager,
//! whose runner is wrapped in a [`ScreenedRunner`] so strategy-proposed
//! candidates are screened by the same validator before the sandbox sees
//! them.

use crate::error::CoreError;
use crate::generate::{CodeGenerator, GenerationContext};
use crate::validation::{ScreenedRunner, Severity, Validator};
use progopt_eval::{ProgramRunner, RunPolicy};
use progopt_jobs::{JobConfig, JobManager, JobSnapshot, JobSupervisor};
use progopt_sandbox::{ExecutionRequest, ExecutionResult, ExecutionSandbox, SandboxConfig};
use progopt_store::{JobId, JobStore};
use std::sync::Arc;

/// Facade configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Sandbox setup shared by ad-hoc runs and jobs
    pub sandbox: SandboxConfig,
    /// Concurrency cap for optimization jobs
    pub max_concurrent_jobs: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            max_concurrent_jobs: 2,
        }
    }
}

/// Outcome of a generate-and-run round trip
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Source the generator produced
    pub source: String,
    /// What running it did
    pub result: ExecutionResult,
}

/// Interactive code assistant
pub struct Assistant {
    generator: Arc<dyn CodeGenerator>,
    validator: Arc<dyn Validator>,
    sandbox: Arc<ExecutionSandbox>,
    jobs: Arc<JobManager>,
}

impl Assistant {
    /// Assemble the stack over a generator, validator, and job store
    ///
    /// Must be created inside a tokio runtime; the job supervisor spawns
    /// its admission task here.
    #[must_use]
    pub fn new(
        config: AssistantConfig,
        generator: Arc<dyn CodeGenerator>,
        validator: Arc<dyn Validator>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let sandbox = Arc::new(ExecutionSandbox::new(config.sandbox));
        let screened: Arc<dyn ProgramRunner> =
            Arc::new(ScreenedRunner::new(sandbox.clone(), validator.clone()));
        let supervisor = Arc::new(JobSupervisor::new(config.max_concurrent_jobs));
        let jobs = Arc::new(JobManager::new(store, screened, supervisor));
        Self {
            generator,
            validator,
            sandbox,
            jobs,
        }
    }

    /// Validate one piece of code, then execute it in the sandbox
    ///
    /// # Errors
    /// `Rejected` with all findings when validation turns up anything
    /// fatal; `Sandbox` for host failures. Program misbehavior (timeout,
    /// memory, raise) is data on the result.
    pub async fn run_code(
        &self,
        code: &str,
        input: serde_json::Value,
        policy: RunPolicy,
    ) -> Result<ExecutionResult, CoreError> {
        let issues = self.validator.validate(code);
        if issues.iter().any(|i| i.severity == Severity::Fatal) {
            return Err(CoreError::Rejected(issues));
        }
        for issue in &issues {
            tracing::warn!(line = issue.line, message = %issue.message, "validation finding");
        }
        let request = ExecutionRequest {
            code: code.to_string(),
            input,
            limits: policy.limits,
            allow_network: policy.allow_network,
        };
        Ok(self.sandbox.execute(&request).await?)
    }

    /// Generate source for a request, screen it, and run it once
    ///
    /// # Errors
    /// `Generation` when the generator fails, plus everything
    /// [`run_code`](Self::run_code) can return.
    pub async fn generate_and_run(
        &self,
        request: &str,
        context: &GenerationContext,
        input: serde_json::Value,
        policy: RunPolicy,
    ) -> Result<RunReport, CoreError> {
        let source = self.generator.generate(request, context).await?;
        tracing::debug!(bytes = source.len(), "generator produced source");
        let result = self.run_code(&source, input, policy).await?;
        Ok(RunReport { source, result })
    }

    /// Start a long-running optimization job
    ///
    /// # Errors
    /// Whatever [`JobManager::start`] rejects.
    pub async fn optimize(&self, config: JobConfig) -> Result<JobId, CoreError> {
        Ok(self.jobs.start(config).await?)
    }

    /// Current snapshot of one job
    ///
    /// # Errors
    /// `Job` wrapping `NotFound` for an unknown id.
    pub async fn job_status(&self, id: JobId) -> Result<JobSnapshot, CoreError> {
        Ok(self.jobs.status(id).await?)
    }

    /// Request a cooperative pause
    ///
    /// # Errors
    /// `Job` wrapping `NotFound` or `NotRunning`.
    pub async fn pause_job(&self, id: JobId) -> Result<(), CoreError> {
        Ok(self.jobs.pause(id).await?)
    }

    /// Resume a paused or checkpointed job
    ///
    /// # Errors
    /// `Job` wrapping `AlreadyRunning` or `NotResumable`.
    pub async fn resume_job(&self, id: JobId) -> Result<(), CoreError> {
        Ok(self.jobs.resume(id).await?)
    }

    /// Request cooperative cancellation
    ///
    /// # Errors
    /// `Job` wrapping `NotFound`.
    pub async fn cancel_job(&self, id: JobId) -> Result<(), CoreError> {
        Ok(self.jobs.cancel(id).await?)
    }

    /// Snapshots of every known job
    ///
    /// # Errors
    /// `Job` wrapping storage failures.
    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, CoreError> {
        Ok(self.jobs.list_jobs().await?)
    }

    /// Cancel every tracked job and wait for workers to park their state
    pub async fn shutdown(&self) {
        self.jobs.shutdown().await;
    }
}
