//! Shared utilities for the codeact codebase

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{ErrorKind, Read};
use std::process::{Command, Output, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// A string wrapper that masks its contents in Debug/Display output.
/// Prevents accidental logging of API keys and other secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    #[allow(dead_code)]
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Intentionally access the raw secret value (for headers, URLs, etc.)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<&str> for SecretString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Returned by [`run_cmd_with_timeout`] when the child outlives its deadline.
/// Callers downcast to this to tell a slow candidate apart from a broken sandbox.
#[derive(Debug, Error)]
#[error("command timed out after {0:?}")]
pub struct CommandTimedOut(pub Duration);

/// Kill every process in the group led by `pgid`. Uses SIGKILL on Unix.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg("--")
        .arg(format!("-{}", pgid))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

/// How long to keep collecting output after the command itself has exited
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Collects one child pipe on a background thread.
struct PipeCollector {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl PipeCollector {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (sender, done) = mpsc::channel();
        if let Some(mut pipe) = pipe {
            let sink = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Ok(mut buf) = sink.lock() {
                                buf.extend_from_slice(&chunk[..n]);
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = sender.send(());
            });
        }
        Self { buffer, done }
    }

    /// Whatever arrived before EOF or the grace period, whichever is first
    fn finish(self, grace: Duration) -> Vec<u8> {
        let _ = self.done.recv_timeout(grace);
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }
}

/// Run a command with a timeout, killing its whole process tree on expiry.
/// Stdin is closed; stdout and stderr are captured.
///
/// Completion is the direct child exiting, not its pipes closing: anything
/// it left running in the background is killed at that point.
/// On timeout the error is a [`CommandTimedOut`].
pub fn run_cmd_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {:?}", cmd.get_program()))?;

    let pid = child.id();
    let stdout = PipeCollector::spawn(child.stdout.take());
    let stderr = PipeCollector::spawn(child.stderr.take());

    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(child.wait());
    });

    let status = match receiver.recv_timeout(timeout) {
        Ok(status) => status.context("Failed to execute command")?,
        Err(_) => {
            kill_process_group(pid);
            return Err(CommandTimedOut(timeout).into());
        }
    };

    // Leftover background processes would otherwise hold the pipes open
    kill_process_group(pid);

    Ok(Output {
        status,
        stdout: stdout.finish(PIPE_DRAIN_GRACE),
        stderr: stderr.finish(PIPE_DRAIN_GRACE),
    })
}

/// Check whether `program --version` runs successfully.
pub fn binary_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Lowercase hex SHA-256 of `text`.
pub fn sha256_hex(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Shorten `text` to at most `max_chars` characters for log lines.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
