//! Evaluation harness for candidate programs
//!
//! Scores one candidate over an ordered dataset of examples:
//! - One sandbox run per example, in dataset order
//! - Caller-supplied scoring through the [`Scorer`] trait
//! - Sandbox failures contribute the worst-case score and never abort a batch
//! - Partial progress observable through [`EvalProgress`] without blocking
//!
//! The sandbox is reached through the [`ProgramRunner`] seam so the harness
//! and everything above it can be exercised with in-memory runners.

pub mod example;
pub mod harness;
pub mod metric;
pub mod runner;
pub mod scorer;

pub use example::{Candidate, Example};
pub use harness::{EvalProgress, EvaluationHarness, RunPolicy};
pub use metric::{AggregateMetric, EvaluationRecord};
pub use runner::ProgramRunner;
pub use scorer::{ExactMatchScorer, Scorer, WORST_CASE_SCORE};
