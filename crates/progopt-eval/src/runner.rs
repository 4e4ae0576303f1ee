//! Program runner seam
//!
//! The harness talks to the sandbox only through this trait, which keeps the
//! job layer testable with in-memory runners.

use async_trait::async_trait;
use progopt_sandbox::{ExecutionRequest, ExecutionResult, ExecutionSandbox, SandboxError};

/// Async seam over the execution sandbox
#[async_trait]
pub trait ProgramRunner: Send + Sync {
    /// Run one request to completion
    ///
    /// # Errors
    /// Host failures only; program misbehavior is data on the result.
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError>;
}

#[async_trait]
impl ProgramRunner for ExecutionSandbox {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        self.execute(request).await
    }
}
