//! Sandbox host errors
//!
//! Only failures of the sandbox itself live here. Anything the untrusted
//! program does wrong is data on [`crate::ExecutionOutcome`].

/// Host-side sandbox failure
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The interpreter could not be started
    #[error("failed to spawn interpreter `{interpreter}`: {source}")]
    Spawn {
        /// Interpreter command that failed
        interpreter: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Scratch directory or pipe handling failed
    #[error("sandbox host error: {0}")]
    Host(#[from] std::io::Error),
}
