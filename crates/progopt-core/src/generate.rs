//! Code generation seam

use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Reference material handed to the generator alongside the request
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    /// Named snippets: file contents, schemas, prior attempts
    pub references: BTreeMap<String, String>,
}

impl GenerationContext {
    /// Empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one named reference snippet
    #[must_use]
    pub fn with_reference(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.references.insert(name.into(), content.into());
        self
    }
}

/// Produces program source from a natural-language request
///
/// Implementations typically wrap a model endpoint; the facade only needs
/// the source text back.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate source for the request
    ///
    /// # Errors
    /// `Generation` when no usable source can be produced.
    async fn generate(
        &self,
        request: &str,
        context: &GenerationContext,
    ) -> Result<String, CoreError>;
}
