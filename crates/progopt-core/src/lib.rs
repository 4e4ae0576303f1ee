//! Assistant facade over generation, validation, execution, and
//! optimization
//!
//! Ties the lower crates together behind one entry point:
//! - [`CodeGenerator`]: pluggable source generation
//! - [`Validator`] / [`BasicValidator`]: static screening before any code
//!   reaches the sandbox
//! - [`Assistant`]: run ad-hoc code, generate-and-run, and drive
//!   long-running optimization jobs

pub mod assistant;
pub mod error;
pub mod generate;
pub mod validation;

pub use assistant::{Assistant, AssistantConfig, RunReport};
pub use error::CoreError;
pub use generate::{CodeGenerator, GenerationContext};
pub use validation::{BasicValidator, Issue, ScreenedRunner, Severity, Validator};

/// Install the process-wide tracing subscriber
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
