use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::harness::{self, RawRun, Workspace, HARNESS_FILE};
use super::state::TaskState;
use super::Sandbox;
use crate::config::SandboxConfig;
use crate::util::{run_cmd_with_timeout, truncate_for_log, CommandTimedOut};

/// Structured description of a candidate that raised (or never finished).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    /// Exception type name, or `Timeout` / `SandboxExit`
    pub kind: String,
    pub message: String,
    /// Full traceback as printed by the interpreter
    pub trace: String,
}

impl ExecutionFailure {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        trace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: trace.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            "Timeout",
            format!("execution exceeded {}s", limit.as_secs_f64()),
            String::new(),
        )
    }
}

/// Result of running one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        value: Value,
        /// false when the candidate never bound `result`
        bound: bool,
        /// whatever the candidate printed
        stdout: String,
    },
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            ExecutionOutcome::Failure(f) => Some(f),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

/// Execution step: run the current candidate and fold the outcome into `state`.
///
/// Candidate failures become state (`failure` set, `attempt_count` + 1).
/// `Err` is reserved for sandbox infrastructure problems, which are fatal.
pub fn execution_step(sandbox: &dyn Sandbox, state: &mut TaskState) -> Result<ExecutionOutcome> {
    let code = state.candidate().unwrap_or_default().to_string();
    debug!(
        "Executing candidate in {} sandbox ({} bytes)",
        sandbox.name(),
        code.len()
    );

    let outcome = sandbox.execute(&code)?;

    match &outcome {
        ExecutionOutcome::Success { value, bound, .. } => {
            if !bound {
                info!("  ✓ Execution finished without binding `result`");
            } else {
                info!("  ✓ Execution succeeded");
            }
            state.record_success(value.clone());
        }
        ExecutionOutcome::Failure(failure) => {
            warn!(
                "  ✗ Execution failed: {}",
                truncate_for_log(&failure.to_string(), 200)
            );
            state.record_failure(failure.clone());
        }
    }

    Ok(outcome)
}

/// Runs the harness with a host interpreter in isolated mode (`-I`), inside a
/// throwaway directory and with a scrubbed environment.
///
/// Each call gets a fresh process, so no state leaks between candidates.
/// There is no network or filesystem confinement beyond that; use the
/// container sandbox when that matters.
pub struct ProcessSandbox {
    interpreter: String,
    timeout: Duration,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn build_command(&self, workspace: &Workspace) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg("-B")
            .arg(HARNESS_FILE)
            .arg(workspace.marker())
            .current_dir(workspace.path())
            .env_clear()
            .env("HOME", workspace.path())
            .env("TMPDIR", workspace.path());
        if let Some(path) = env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }
}

impl Sandbox for ProcessSandbox {
    fn name(&self) -> &str {
        "process"
    }

    fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
        let workspace = Workspace::prepare(code)?;
        let cmd = self.build_command(&workspace);
        debug!("Executing: {:?}", cmd);

        let output = match run_cmd_with_timeout(cmd, self.timeout) {
            Ok(output) => output,
            Err(e) if e.downcast_ref::<CommandTimedOut>().is_some() => {
                warn!("Candidate timed out after {:?}", self.timeout);
                return Ok(ExecutionOutcome::Failure(ExecutionFailure::timeout(
                    self.timeout,
                )));
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to run interpreter '{}'", self.interpreter)
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let raw = RawRun {
            stdout: &stdout,
            stderr: &stderr,
            exit_code: output.status.code(),
        };

        Ok(harness::parse_outcome(&raw, &workspace.marker())
            .unwrap_or_else(|| ExecutionOutcome::Failure(harness::missing_outcome_failure(&raw))))
    }
}
