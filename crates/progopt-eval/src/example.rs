//! Examples and candidate programs

use serde::{Deserialize, Serialize};

/// One dataset example: an input payload and an optional expected output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Input payload handed to the program
    pub input: serde_json::Value,
    /// Expected output, when the scorer wants to compare against one
    pub expected: Option<serde_json::Value>,
}

impl Example {
    /// Example with an expected output
    #[must_use]
    pub fn new(input: serde_json::Value, expected: serde_json::Value) -> Self {
        Self {
            input,
            expected: Some(expected),
        }
    }

    /// Example scored without a reference output
    #[inline]
    #[must_use]
    pub fn unchecked(input: serde_json::Value) -> Self {
        Self {
            input,
            expected: None,
        }
    }
}

/// One generated-program variant under evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source text of the program
    pub source: String,
}

impl Candidate {
    /// Wrap source text as a candidate
    #[inline]
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}
