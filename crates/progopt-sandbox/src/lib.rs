//! Execution sandbox for untrusted generated code
//!
//! Runs a single unit of generated code in an isolated child interpreter:
//! - Per-call scratch directory, removed on every exit path
//! - Environment allow-list (nothing from the parent leaks by default)
//! - Wall-clock watchdog and address-space cap
//! - Every run classified into exactly one [`ExecutionOutcome`]
//!
//! Timeouts, resource-limit kills, and runtime errors are data carried in
//! the result, never crate-level errors. [`SandboxError`] is reserved for
//! host failures (the interpreter could not be spawned at all).

pub mod error;
pub mod outcome;
pub mod request;
pub mod sandbox;

pub use error::SandboxError;
pub use outcome::{ExecutionOutcome, ExecutionResult};
pub use request::{ExecutionLimits, ExecutionRequest};
pub use sandbox::{ExecutionSandbox, SandboxConfig};
