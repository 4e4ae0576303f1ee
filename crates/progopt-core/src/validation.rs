//! Static screening of generated source
//!
//! A cheap line-oriented screen that runs before any code reaches the
//! sandbox. It is not the isolation boundary (the sandbox is); it rejects
//! the obvious process, network, and dynamic-import escapes up front with
//! line-level diagnostics.

use async_trait::async_trait;
use progopt_eval::ProgramRunner;
use progopt_sandbox::{ExecutionOutcome, ExecutionRequest, ExecutionResult, SandboxError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How bad one finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks execution
    Fatal,
    /// Worth surfacing, does not block
    Warning,
    /// Informational only
    Info,
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    /// Severity of the finding
    pub severity: Severity,
    /// What was found
    pub message: String,
    /// 1-based source line, when the finding is line-local
    pub line: Option<usize>,
}

impl Issue {
    /// Fatal finding
    #[must_use]
    pub fn fatal(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            severity: Severity::Fatal,
            message: message.into(),
            line,
        }
    }

    /// Non-blocking finding
    #[must_use]
    pub fn warning(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            line,
        }
    }
}

/// Screens source text before execution
pub trait Validator: Send + Sync {
    /// All findings for the source, fatal and otherwise
    fn validate(&self, source: &str) -> Vec<Issue>;
}

/// Modules whose import is rejected outright
const DENIED_MODULES: &[&str] = &[
    "subprocess",
    "socket",
    "ctypes",
    "multiprocessing",
    "importlib",
    "urllib",
    "requests",
    "http",
];

/// Call-site constructs that defeat static screening
const DENIED_CALLS: &[&str] = &["eval(", "exec(", "__import__"];

/// Built-in deny-list screen
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Validator with the built-in deny lists
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, source: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        if source.trim().is_empty() {
            issues.push(Issue::fatal("source is empty", None));
            return issues;
        }
        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                continue;
            }
            for module in DENIED_MODULES {
                if imports_module(trimmed, module) {
                    issues.push(Issue::fatal(
                        format!("import of denied module `{module}`"),
                        Some(line_no),
                    ));
                }
            }
            for call in DENIED_CALLS {
                if trimmed.contains(call) {
                    issues.push(Issue::fatal(
                        format!("use of denied construct `{}`", call.trim_end_matches('(')),
                        Some(line_no),
                    ));
                }
            }
            if trimmed.contains("open(") {
                issues.push(Issue::warning(
                    "file access; only the scratch directory is writable",
                    Some(line_no),
                ));
            }
        }
        issues
    }
}

/// Whether a (left-trimmed) line imports the given module, covering
/// `import x`, `import x as y`, `import a, x`, `import x.sub`, and
/// `from x import ...`
fn imports_module(line: &str, module: &str) -> bool {
    if let Some(rest) = line.strip_prefix("import ") {
        return rest
            .split(',')
            .any(|segment| segment.trim().split(['.', ' ']).next() == Some(module));
    }
    if let Some(rest) = line.strip_prefix("from ") {
        return rest.split(['.', ' ']).next() == Some(module);
    }
    false
}

/// Runner wrapper that screens candidate source before the sandbox sees it
///
/// Inside an optimization job a rejected candidate is reported as a runtime
/// error outcome, so it scores worst case and the batch continues; ad-hoc
/// callers get [`CoreError::Rejected`](crate::CoreError::Rejected) through
/// the facade instead.
pub struct ScreenedRunner {
    inner: Arc<dyn ProgramRunner>,
    validator: Arc<dyn Validator>,
}

impl ScreenedRunner {
    /// Wrap a runner with a validator
    #[must_use]
    pub fn new(inner: Arc<dyn ProgramRunner>, validator: Arc<dyn Validator>) -> Self {
        Self { inner, validator }
    }
}

#[async_trait]
impl ProgramRunner for ScreenedRunner {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let issues = self.validator.validate(&request.code);
        if let Some(fatal) = issues.iter().find(|i| i.severity == Severity::Fatal) {
            tracing::debug!(message = %fatal.message, "candidate blocked by validation");
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome::RuntimeError {
                    message: format!("blocked by validation: {}", fatal.message),
                },
                stdout: String::new(),
                stderr: String::new(),
                wall_time: Duration::ZERO,
                memory_cap_enforced: false,
            });
        }
        self.inner.run(request).await
    }
}
