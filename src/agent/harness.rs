//! Python-side harness shared by every sandbox.
//!
//! The harness runs the candidate in a fresh namespace and reports a single
//! tagged JSON envelope on stdout, prefixed with a per-run marker. The host
//! decides success from that envelope only, never from exit codes or from
//! scraping tracebacks.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tracing::debug;

use super::executor::{ExecutionFailure, ExecutionOutcome};
use crate::util::sha256_hex;

pub const CANDIDATE_FILE: &str = "candidate.py";
pub const HARNESS_FILE: &str = "harness.py";

/// Reported as the value when the candidate never binds `result`.
pub const NO_RESULT_PLACEHOLDER: &str = "Execution completed. No `result` variable found.";

const MARKER_PREFIX: &str = "__CODEACT_OUTCOME_";

const HARNESS_SOURCE: &str = r#"import json
import os
import sys
import traceback

INT_MIN = -(2 ** 63)
UINT_MAX = 2 ** 64 - 1


def portable(value):
    # Integers the host cannot hold exactly travel as their digits
    if isinstance(value, bool):
        return value
    if isinstance(value, int):
        return value if INT_MIN <= value <= UINT_MAX else repr(value)
    if isinstance(value, dict):
        return {key: portable(item) for key, item in value.items()}
    if isinstance(value, (list, tuple)):
        return [portable(item) for item in value]
    return value


def main():
    marker = sys.argv[1]
    del sys.argv[1:]
    out_fd = os.dup(1)

    def emit(payload):
        try:
            sys.stdout.flush()
        except Exception:
            pass
        if hasattr(sys, "set_int_max_str_digits"):
            sys.set_int_max_str_digits(0)
        try:
            if "value" in payload:
                payload["value"] = portable(payload["value"])
            body = json.dumps(payload, default=repr, allow_nan=False)
        except (TypeError, ValueError, RecursionError):
            payload["value"] = repr(payload.get("value"))
            body = json.dumps(payload, default=repr, allow_nan=False)
        os.write(out_fd, ("\n" + marker + body + "\n").encode("utf-8", "replace"))

    def fail(exc):
        emit({
            "status": "error",
            "kind": type(exc).__name__,
            "message": str(exc),
            "trace": traceback.format_exc(),
        })

    with open("candidate.py", encoding="utf-8") as handle:
        source = handle.read()

    scope = {"__name__": "__main__", "__builtins__": __builtins__}
    try:
        exec(compile(source, "candidate.py", "exec"), scope)
    except SystemExit as exc:
        if exc.code not in (None, 0):
            fail(exc)
            return
    except BaseException as exc:
        fail(exc)
        return

    if "result" in scope:
        emit({"status": "ok", "bound": True, "value": scope["result"]})
    else:
        emit({"status": "ok", "bound": False, "value": None})


main()
"#;

/// Throwaway directory holding one candidate and the harness.
/// Removed from disk when dropped.
pub struct Workspace {
    dir: TempDir,
    nonce: String,
}

impl Workspace {
    pub fn prepare(code: &str) -> Result<Self> {
        let dir: TempDir = tempfile::Builder::new()
            .prefix("codeact-")
            .tempdir()
            .context("Failed to create temp directory")?;
        debug!("Created workspace: {}", dir.path().display());

        fs::write(dir.path().join(CANDIDATE_FILE), code)
            .context("Failed to write candidate script")?;
        fs::write(dir.path().join(HARNESS_FILE), HARNESS_SOURCE)
            .context("Failed to write harness script")?;

        // The container user is unprivileged and does not own the mount
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;
            for file in [CANDIDATE_FILE, HARNESS_FILE] {
                fs::set_permissions(dir.path().join(file), fs::Permissions::from_mode(0o644))?;
            }
        }

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seed = format!("{}:{}:{}", dir.path().display(), std::process::id(), nanos);
        let nonce = sha256_hex(&seed)[..24].to_string();

        Ok(Self { dir, nonce })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Short name derived from the directory, safe for container names
    pub fn id(&self) -> String {
        self.dir
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect()
    }

    /// Argument handed to the harness; it prefixes the outcome line with it
    pub fn marker(&self) -> String {
        format!("{}{}__", MARKER_PREFIX, self.nonce)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Envelope {
    Ok {
        bound: bool,
        #[serde(default)]
        value: Value,
    },
    Error {
        kind: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        trace: String,
    },
}

/// What the sandbox process left behind, before interpretation
pub struct RawRun<'a> {
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub exit_code: Option<i32>,
}

/// Turn harness output into an outcome.
///
/// Returns `None` when no envelope was printed; the caller decides whether
/// that is a crashed candidate or a broken sandbox.
pub fn parse_outcome(raw: &RawRun<'_>, marker: &str) -> Option<ExecutionOutcome> {
    let mut envelope_line = None;
    let mut printed = Vec::new();
    for line in raw.stdout.lines() {
        match line.strip_prefix(marker) {
            Some(rest) => envelope_line = Some(rest),
            None => printed.push(line),
        }
    }
    let stdout = printed.join("\n").trim_end().to_string();

    let envelope: Envelope = match serde_json::from_str(envelope_line?) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Unreadable outcome envelope: {}", e);
            return None;
        }
    };

    Some(match envelope {
        Envelope::Ok { bound: true, value } => ExecutionOutcome::Success {
            value,
            bound: true,
            stdout,
        },
        Envelope::Ok { bound: false, .. } => ExecutionOutcome::Success {
            value: Value::String(NO_RESULT_PLACEHOLDER.to_string()),
            bound: false,
            stdout,
        },
        Envelope::Error {
            kind,
            message,
            trace,
        } => ExecutionOutcome::Failure(ExecutionFailure::new(kind, message, trace)),
    })
}

/// Failure for a run that ended without an envelope (killed, OOM, os._exit).
pub fn missing_outcome_failure(raw: &RawRun<'_>) -> ExecutionFailure {
    let status = match raw.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    };
    let mut trace = raw.stderr.trim().to_string();
    if trace.is_empty() {
        trace = raw.stdout.trim().to_string();
    }
    ExecutionFailure::new(
        "SandboxExit",
        format!("sandbox ended ({}) without reporting an outcome", status),
        trace,
    )
}
