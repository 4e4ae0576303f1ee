//! Proposal strategies
//!
//! A strategy owns both sides of the optimization loop: proposing the next
//! candidate and scoring one example's execution result. Selection is by
//! name through a [`StrategyRegistry`], so a persisted config can rebind its
//! strategy on resume without any caller-supplied callable. Internal state
//! crosses restarts as an opaque JSON blob inside the checkpoint.

use crate::error::JobError;
use progopt_eval::{Candidate, ExactMatchScorer, Example, Scorer};
use progopt_sandbox::ExecutionResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Named strategy selection with free-form parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    /// Registry key
    pub name: String,
    /// Builder-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StrategySpec {
    /// Spec with explicit parameters
    #[must_use]
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Built-in sweep over a fixed pool of source variants
    #[must_use]
    pub fn variant_sweep<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants: Vec<String> = variants.into_iter().map(Into::into).collect();
        Self::new("variant_sweep", serde_json::json!({ "variants": variants }))
    }

    /// Built-in seeded sampling from a pool of source variants
    #[must_use]
    pub fn random_search<I, S>(variants: I, seed: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants: Vec<String> = variants.into_iter().map(Into::into).collect();
        Self::new(
            "random_search",
            serde_json::json!({ "variants": variants, "seed": seed }),
        )
    }
}

/// One optimization proposal strategy
pub trait OptimizationStrategy: Send + Sync {
    /// Propose the candidate for the given zero-based iteration
    ///
    /// # Errors
    /// A strategy-internal failure here fails the whole job.
    fn propose(
        &mut self,
        previous_best: Option<&Candidate>,
        iteration: u32,
    ) -> Result<Candidate, JobError>;

    /// Score one successful execution against its example, in `[0.0, 1.0]`
    fn score_example(&self, example: &Example, result: &ExecutionResult) -> f64;

    /// Internal state to embed in checkpoints
    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Restore state captured by [`state`](Self::state)
    fn restore(&mut self, _state: &serde_json::Value) {}
}

/// Presents a strategy's scoring side to the evaluation harness
pub(crate) struct StrategyScorer<'a>(pub &'a dyn OptimizationStrategy);

impl Scorer for StrategyScorer<'_> {
    fn score(&self, example: &Example, result: &ExecutionResult) -> f64 {
        self.0.score_example(example, result)
    }
}

/// Builds a strategy from spec parameters
pub trait StrategyBuilder: Send + Sync {
    /// Build a fresh strategy instance
    ///
    /// # Errors
    /// `InvalidConfiguration` when the parameters do not parse.
    fn build(&self, params: &serde_json::Value) -> Result<Box<dyn OptimizationStrategy>, JobError>;
}

/// Name-to-builder registry
pub struct StrategyRegistry {
    builders: HashMap<String, Arc<dyn StrategyBuilder>>,
}

impl StrategyRegistry {
    /// Registry with no builders
    #[must_use]
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with the built-in strategies
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("variant_sweep", Arc::new(VariantSweepBuilder));
        registry.register("random_search", Arc::new(RandomSearchBuilder));
        registry
    }

    /// Register (or replace) a builder under `name`
    pub fn register(&mut self, name: impl Into<String>, builder: Arc<dyn StrategyBuilder>) {
        self.builders.insert(name.into(), builder);
    }

    /// Whether `name` has a builder
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Build the strategy a spec names
    ///
    /// # Errors
    /// `UnknownStrategy` for an unregistered name, or whatever the builder
    /// rejects.
    pub fn build(&self, spec: &StrategySpec) -> Result<Box<dyn OptimizationStrategy>, JobError> {
        self.builders
            .get(&spec.name)
            .ok_or_else(|| JobError::UnknownStrategy(spec.name.clone()))?
            .build(&spec.params)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Debug, Deserialize)]
struct VariantParams {
    variants: Vec<String>,
}

fn parse_variants(params: &serde_json::Value) -> Result<Vec<String>, JobError> {
    let parsed: VariantParams = serde_json::from_value(params.clone())
        .map_err(|e| JobError::InvalidConfiguration(format!("strategy params: {e}")))?;
    if parsed.variants.is_empty() {
        return Err(JobError::InvalidConfiguration(
            "strategy needs at least one variant".to_string(),
        ));
    }
    Ok(parsed.variants)
}

/// Deterministic round-robin over a fixed variant pool, scored by exact
/// match
pub struct VariantSweepStrategy {
    variants: Vec<String>,
}

impl VariantSweepStrategy {
    /// Strategy over the given pool
    #[must_use]
    pub fn new(variants: Vec<String>) -> Self {
        Self { variants }
    }
}

impl OptimizationStrategy for VariantSweepStrategy {
    fn propose(
        &mut self,
        _previous_best: Option<&Candidate>,
        iteration: u32,
    ) -> Result<Candidate, JobError> {
        if self.variants.is_empty() {
            return Err(JobError::Strategy("no variants to sweep".to_string()));
        }
        let index = iteration as usize % self.variants.len();
        Ok(Candidate::new(self.variants[index].clone()))
    }

    fn score_example(&self, example: &Example, result: &ExecutionResult) -> f64 {
        ExactMatchScorer.score(example, result)
    }
}

struct VariantSweepBuilder;

impl StrategyBuilder for VariantSweepBuilder {
    fn build(&self, params: &serde_json::Value) -> Result<Box<dyn OptimizationStrategy>, JobError> {
        Ok(Box::new(VariantSweepStrategy::new(parse_variants(params)?)))
    }
}

#[derive(Debug, Deserialize)]
struct RandomSearchParams {
    variants: Vec<String>,
    #[serde(default)]
    seed: u64,
}

const LCG_MUL: u64 = 6364136223846793005;
const LCG_INC: u64 = 1442695040888963407;

/// Seeded sampling with replacement from a variant pool
///
/// Draws come from a linear congruential generator whose state rides in the
/// checkpoint, so a resumed job continues the exact sequence it would have
/// produced uninterrupted.
pub struct RandomSearchStrategy {
    variants: Vec<String>,
    state: u64,
}

impl RandomSearchStrategy {
    /// Strategy over the given pool, seeded
    #[must_use]
    pub fn new(variants: Vec<String>, seed: u64) -> Self {
        Self {
            variants,
            state: seed,
        }
    }
}

impl OptimizationStrategy for RandomSearchStrategy {
    fn propose(
        &mut self,
        _previous_best: Option<&Candidate>,
        _iteration: u32,
    ) -> Result<Candidate, JobError> {
        if self.variants.is_empty() {
            return Err(JobError::Strategy("no variants to sample".to_string()));
        }
        self.state = self.state.wrapping_mul(LCG_MUL).wrapping_add(LCG_INC);
        let index = (self.state >> 33) as usize % self.variants.len();
        Ok(Candidate::new(self.variants[index].clone()))
    }

    fn score_example(&self, example: &Example, result: &ExecutionResult) -> f64 {
        ExactMatchScorer.score(example, result)
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({ "lcg": self.state })
    }

    fn restore(&mut self, state: &serde_json::Value) {
        if let Some(lcg) = state.get("lcg").and_then(serde_json::Value::as_u64) {
            self.state = lcg;
        }
    }
}

struct RandomSearchBuilder;

impl StrategyBuilder for RandomSearchBuilder {
    fn build(&self, params: &serde_json::Value) -> Result<Box<dyn OptimizationStrategy>, JobError> {
        let parsed: RandomSearchParams = serde_json::from_value(params.clone())
            .map_err(|e| JobError::InvalidConfiguration(format!("strategy params: {e}")))?;
        if parsed.variants.is_empty() {
            return Err(JobError::InvalidConfiguration(
                "strategy needs at least one variant".to_string(),
            ));
        }
        Ok(Box::new(RandomSearchStrategy::new(
            parsed.variants,
            parsed.seed,
        )))
    }
}
