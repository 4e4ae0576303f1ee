//! Execution requests and resource limits

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits applied to a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock limit for the child process
    pub time_limit: Duration,
    /// Address-space cap in bytes
    pub memory_limit_bytes: u64,
}

impl ExecutionLimits {
    /// Create limits from a time budget and a memory cap
    #[inline]
    #[must_use]
    pub fn new(time_limit: Duration, memory_limit_bytes: u64) -> Self {
        Self {
            time_limit,
            memory_limit_bytes,
        }
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            memory_limit_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One unit of code to run in isolation
///
/// The input payload is serialized as JSON onto the child's stdin; nothing
/// else crosses the isolation boundary. The program's return value is read
/// back as the last non-empty line of stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source text of the program
    pub code: String,
    /// Input payload handed to the program on stdin
    pub input: serde_json::Value,
    /// Per-call resource limits
    pub limits: ExecutionLimits,
    /// Opaque capability flag: widen the child environment enough for
    /// outbound tool access. Process-level network namespacing needs host
    /// privileges the sandbox does not assume, so the default closed policy
    /// works by handing the child no usable environment.
    pub allow_network: bool,
}

impl ExecutionRequest {
    /// Create a request with default limits and no network access
    #[must_use]
    pub fn new(code: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            code: code.into(),
            input,
            limits: ExecutionLimits::default(),
            allow_network: false,
        }
    }

    /// With explicit limits
    #[inline]
    #[must_use]
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// With network access
    #[inline]
    #[must_use]
    pub fn with_network(mut self) -> Self {
        self.allow_network = true;
        self
    }
}
