//! Child-process sandbox
//!
//! Each call to [`ExecutionSandbox::execute`] gets a fresh scratch directory,
//! a child interpreter with a scrubbed environment in its own process group,
//! a wall-clock watchdog, and (on Unix) an address-space cap applied between
//! fork and exec. The scratch directory is removed and the process group
//! swept on every exit path, so nothing the program backgrounds can outlive
//! the call or hold its pipes open.

use crate::error::SandboxError;
use crate::outcome::{ExecutionOutcome, ExecutionResult};
use crate::request::ExecutionRequest;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Fallback PATH handed to the child when the parent environment is withheld
const SCRUBBED_PATH: &str = "/usr/bin:/bin";

/// Extra time allowed for pipe drains after the child has been reaped
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter command used to run generated code
    pub interpreter: PathBuf,
    /// Filename the source text is written under inside the scratch dir
    pub source_filename: String,
}

impl SandboxConfig {
    /// Configuration for a specific interpreter
    #[must_use]
    pub fn for_interpreter(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            ..Self::default()
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            source_filename: "program.py".to_string(),
        }
    }
}

/// Isolated runner for untrusted generated code
#[derive(Debug, Clone)]
pub struct ExecutionSandbox {
    config: SandboxConfig,
}

impl ExecutionSandbox {
    /// Create a sandbox with the given configuration
    #[inline]
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Execute one request to completion
    ///
    /// # Workflow
    /// 1. Write the source into a fresh scratch directory
    /// 2. Spawn the interpreter with a scrubbed environment
    /// 3. Feed the input payload as JSON on stdin
    /// 4. Race the child against the wall-clock limit
    /// 5. Classify the exit into exactly one [`ExecutionOutcome`]
    ///
    /// # Errors
    /// Only host failures (scratch dir, spawn, pipe I/O). Whatever the
    /// generated program does wrong is reported in the outcome instead.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError> {
        let scratch = tempfile::TempDir::new()?;
        let source_path = scratch.path().join(&self.config.source_filename);
        tokio::fs::write(&source_path, &request.code).await?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&source_path)
            .current_dir(scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Isolation boundary: nothing from the parent environment by default.
        cmd.env_clear();
        cmd.env("HOME", scratch.path());
        cmd.env("TMPDIR", scratch.path());
        if request.allow_network {
            cmd.env(
                "PATH",
                std::env::var("PATH").unwrap_or_else(|_| SCRUBBED_PATH.to_string()),
            );
        } else {
            cmd.env("PATH", SCRUBBED_PATH);
        }

        let memory_cap_enforced = apply_memory_cap(&mut cmd, request.limits.memory_limit_bytes);
        isolate_process_group(&mut cmd);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            interpreter: self.config.interpreter.display().to_string(),
            source,
        })?;
        let child_pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            if let Ok(payload) = serde_json::to_vec(&request.input) {
                // A program that never reads stdin closes the pipe early;
                // that is its business, not a host failure.
                let _ = stdin.write_all(&payload).await;
            }
        }

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let waited = tokio::time::timeout(request.limits.time_limit, child.wait()).await;
        let status = match waited {
            Ok(status) => Some(status?),
            Err(_) => {
                tracing::warn!(
                    limit_ms = request.limits.time_limit.as_millis() as u64,
                    "execution exceeded wall-clock limit, killing process group"
                );
                kill_process_group(child_pid);
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };
        // Anything the program backgrounded is part of the cleanup contract
        // too; a straggler would also hold the pipes open forever.
        kill_process_group(child_pid);

        let wall_time = started.elapsed();
        let drain_budget = request
            .limits
            .time_limit
            .saturating_sub(wall_time)
            .saturating_add(DRAIN_GRACE);
        let stdout = drain_bounded(stdout_task, drain_budget).await;
        let stderr = drain_bounded(stderr_task, drain_budget).await;

        let outcome = match status {
            None => ExecutionOutcome::Timeout,
            Some(status) => classify_exit(
                status.code(),
                exit_signal(&status),
                &stdout,
                &stderr,
                memory_cap_enforced,
            ),
        };

        tracing::debug!(
            outcome = outcome.label(),
            wall_ms = wall_time.as_millis() as u64,
            "sandbox execution finished"
        );

        // Scratch dir removal is the cleanup contract; TempDir drops here on
        // every path out of this function.
        drop(scratch);

        Ok(ExecutionResult {
            outcome,
            stdout,
            stderr,
            wall_time,
            memory_cap_enforced,
        })
    }

    /// Sandbox configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl Default for ExecutionSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// Drain a child pipe to a string, tolerating early closure
async fn read_stream<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf).await;
    }
    buf
}

/// Await a pipe-drain task, giving up after `budget` so a pipe held open by
/// an unkillable straggler can never wedge the call
async fn drain_bounded(task: tokio::task::JoinHandle<String>, budget: Duration) -> String {
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            tracing::warn!("pipe drain exceeded its budget, abandoning output");
            String::new()
        }
    }
}

/// Put the child in its own session so the whole process group can be
/// killed, including anything the program backgrounds
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child's process group; a group that is already gone is fine
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            let _ = libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Classify a finished (non-timeout) child exit
///
/// Exit 0 is the only success. A SIGKILL while a memory cap was enforced,
/// or an out-of-memory marker on stderr, is a resource-limit violation;
/// everything else abnormal is a runtime error carrying stderr.
fn classify_exit(
    code: Option<i32>,
    signal: Option<i32>,
    stdout: &str,
    stderr: &str,
    memory_cap_enforced: bool,
) -> ExecutionOutcome {
    if code == Some(0) {
        return ExecutionOutcome::Success {
            value: parse_return_value(stdout),
        };
    }

    if memory_cap_enforced {
        let oom_kill = signal == Some(9);
        let oom_marker =
            stderr.contains("MemoryError") || stderr.contains("std::bad_alloc");
        if oom_kill || oom_marker {
            return ExecutionOutcome::ResourceLimit;
        }
    }

    let message = if stderr.trim().is_empty() {
        match (code, signal) {
            (Some(code), _) => format!("process exited with code {code}"),
            (None, Some(signal)) => format!("process killed by signal {signal}"),
            (None, None) => "process exited abnormally".to_string(),
        }
    } else {
        stderr.trim().to_string()
    };

    ExecutionOutcome::RuntimeError { message }
}

/// Program return value: the last non-empty stdout line as JSON, with a raw
/// string fallback; an entirely silent program returns null.
fn parse_return_value(stdout: &str) -> serde_json::Value {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty());
    match line {
        None => serde_json::Value::Null,
        Some(line) => serde_json::from_str(line.trim())
            .unwrap_or_else(|_| serde_json::Value::String(line.trim().to_string())),
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn apply_memory_cap(cmd: &mut Command, bytes: u64) -> bool {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    unsafe {
        cmd.pre_exec(move || {
            if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    true
}

#[cfg(not(unix))]
fn apply_memory_cap(_cmd: &mut Command, _bytes: u64) -> bool {
    false
}
