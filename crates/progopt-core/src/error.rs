//! Facade errors

use crate::validation::Issue;
use progopt_jobs::JobError;
use progopt_sandbox::SandboxError;

/// Assistant-level failure
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Validation found at least one fatal issue; the code never reached
    /// the sandbox
    #[error("source rejected by validation ({} issue(s))", .0.len())]
    Rejected(Vec<Issue>),

    /// The generator produced no usable source
    #[error("code generation failed: {0}")]
    Generation(String),

    /// Host-level sandbox failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Job management failure
    #[error(transparent)]
    Job(#[from] JobError),
}
