//! Long-running optimization jobs
//!
//! The control surface for iterative candidate optimization:
//! - [`JobManager`]: start, status, pause, resume, cancel, list
//! - [`JobSupervisor`]: bounded concurrent admission with FIFO overflow
//! - [`OptimizationStrategy`] / [`StrategyRegistry`]: pluggable proposal
//!   strategies, rebindable from a persisted config on resume
//! - worker loop: one task per admitted job, checkpointing progress and
//!   observing control signals at iteration boundaries
//!
//! Jobs survive process restarts: identity, status, and progress live in a
//! [`progopt_store::JobStore`], and a checkpoint is enough to resume without
//! redoing completed iterations.

pub mod config;
pub mod error;
pub mod manager;
pub mod snapshot;
pub mod state;
pub mod strategy;
pub mod supervisor;
pub(crate) mod worker;

pub use config::JobConfig;
pub use error::JobError;
pub use manager::JobManager;
pub use snapshot::JobSnapshot;
pub use strategy::{
    OptimizationStrategy, RandomSearchStrategy, StrategyBuilder, StrategyRegistry, StrategySpec,
    VariantSweepStrategy,
};
pub use supervisor::JobSupervisor;
