//! Container-based sandbox for candidate code
//! Supports Docker, Podman, and other OCI-compatible runtimes

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::executor::{ExecutionFailure, ExecutionOutcome};
use super::harness::{self, RawRun, Workspace, HARNESS_FILE};
use super::Sandbox;
use crate::config::SandboxConfig;
use crate::util::{binary_available, run_cmd_with_timeout, CommandTimedOut};

/// Exit codes the runtime itself uses for "could not start the container"
const RUNTIME_FAILURE_CODES: [i32; 3] = [125, 126, 127];

pub struct ContainerSandbox {
    config: SandboxConfig,
    image_ready: AtomicBool,
}

impl ContainerSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            image_ready: AtomicBool::new(false),
        }
    }

    /// Make sure the image is local before any candidate clock starts.
    fn ensure_image(&self) -> Result<()> {
        if self.image_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        ensure_image(&self.config.runtime, &self.config.image)?;
        self.image_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Build the `<runtime> run` invocation for one workspace.
    ///
    /// The workspace is mounted read-only, the root filesystem is read-only
    /// with a small tmpfs, networking is off unless configured, and the
    /// process runs as `nobody` with every capability dropped.
    fn build_run_command(&self, workspace: &Workspace, container_name: &str) -> Command {
        let mut cmd = Command::new(&self.config.runtime);
        cmd.arg("run")
            .arg("--rm")
            .arg("--pull")
            .arg("never")
            .arg("--name")
            .arg(container_name);

        if !self.config.network {
            cmd.arg("--network").arg("none");
        }

        cmd.arg("--read-only")
            .arg("--tmpfs")
            .arg("/tmp")
            .arg("--memory")
            .arg(&self.config.memory)
            .arg("--cpus")
            .arg(&self.config.cpus)
            .arg("--pids-limit")
            .arg(self.config.pids_limit.to_string())
            .arg("--cap-drop")
            .arg("ALL")
            .arg("--security-opt")
            .arg("no-new-privileges")
            .arg("--user")
            .arg("65534:65534")
            .arg("-e")
            .arg("HOME=/tmp")
            .arg("-v")
            .arg(format!("{}:/workspace:ro", workspace.path().display()))
            .arg("-w")
            .arg("/workspace")
            .arg(&self.config.image)
            .arg(&self.config.interpreter)
            .arg("-I")
            .arg(HARNESS_FILE)
            .arg(workspace.marker());

        cmd
    }

    fn remove_container(&self, container_name: &str) {
        for action in [&["kill"][..], &["rm", "-f"][..]] {
            let _ = Command::new(&self.config.runtime)
                .args(action)
                .arg(container_name)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

impl Sandbox for ContainerSandbox {
    fn name(&self) -> &str {
        "container"
    }

    fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
        if !binary_available(&self.config.runtime) {
            bail!(
                "{} runtime not found. Please install {} first.",
                self.config.runtime,
                self.config.runtime
            );
        }
        self.ensure_image()?;

        let workspace = Workspace::prepare(code)?;
        let container_name = workspace.id();
        debug!("Container name: {}", container_name);

        let cmd = self.build_run_command(&workspace, &container_name);
        debug!("Executing: {:?}", cmd);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match run_cmd_with_timeout(cmd, timeout) {
            Ok(output) => output,
            Err(e) => {
                self.remove_container(&container_name);
                if e.downcast_ref::<CommandTimedOut>().is_some() {
                    warn!("Candidate timed out after {:?}", timeout);
                    return Ok(ExecutionOutcome::Failure(ExecutionFailure::timeout(timeout)));
                }
                return Err(e).with_context(|| {
                    format!("Failed to start {} container", self.config.runtime)
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let raw = RawRun {
            stdout: &stdout,
            stderr: &stderr,
            exit_code: output.status.code(),
        };

        if let Some(outcome) = harness::parse_outcome(&raw, &workspace.marker()) {
            return Ok(outcome);
        }

        classify_missing_outcome(&raw, &self.config.runtime, &self.config.image)
    }
}

/// `<runtime> image inspect`, then an untimed `<runtime> pull` when missing.
/// A failed pull is a sandbox problem, not a candidate failure.
fn ensure_image(runtime: &str, image: &str) -> Result<()> {
    let present = Command::new(runtime)
        .args(["image", "inspect", image])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if present {
        debug!("Image {} is available locally", image);
        return Ok(());
    }

    info!("Pulling image {} (first run only)", image);
    let output = Command::new(runtime)
        .arg("pull")
        .arg(image)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to run {} pull", runtime))?;
    if !output.status.success() {
        bail!(
            "Failed to pull image {}: {}",
            image,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// No envelope came back: either the runtime never started the candidate
/// (fatal) or the candidate died inside the container (recoverable).
fn classify_missing_outcome(raw: &RawRun<'_>, runtime: &str, image: &str) -> Result<ExecutionOutcome> {
    match raw.exit_code {
        Some(code) if RUNTIME_FAILURE_CODES.contains(&code) => bail!(
            "{} could not run image '{}' (exit code {}): {}",
            runtime,
            image,
            code,
            raw.stderr.trim()
        ),
        _ => Ok(ExecutionOutcome::Failure(harness::missing_outcome_failure(raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> SandboxConfig {
        SandboxConfig {
            runtime: "podman".to_string(),
            image: "python:3.11-alpine".to_string(),
            timeout_secs: 60,
            ..Default::default()
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_run_command_locks_down_container() {
        let sandbox = ContainerSandbox::new(make_config());
        let workspace = Workspace::prepare("result = 1").unwrap();
        let cmd = sandbox.build_run_command(&workspace, "codeact-abc");
        assert_eq!(cmd.get_program(), "podman");

        let args = args_of(&cmd);
        assert_eq!(args[0], "run");
        assert!(args.contains(&"--rm".to_string()));
        assert!(has_pair(&args, "--pull", "never"));
        assert!(args.contains(&"--read-only".to_string()));
        assert!(has_pair(&args, "--name", "codeact-abc"));
        assert!(has_pair(&args, "--network", "none"));
        assert!(has_pair(&args, "--cap-drop", "ALL"));
        assert!(has_pair(&args, "--user", "65534:65534"));
        assert!(has_pair(&args, "--memory", "256m"));
        assert!(has_pair(&args, "--pids-limit", "64"));
        assert!(has_pair(
            &args,
            "-v",
            &format!("{}:/workspace:ro", workspace.path().display())
        ));
    }

    #[test]
    fn test_run_command_ends_with_harness_invocation() {
        let sandbox = ContainerSandbox::new(make_config());
        let workspace = Workspace::prepare("result = 1").unwrap();
        let args = args_of(&sandbox.build_run_command(&workspace, "c"));
        let tail = &args[args.len() - 5..];
        assert_eq!(
            tail,
            &[
                "python:3.11-alpine".to_string(),
                "python3".to_string(),
                "-I".to_string(),
                HARNESS_FILE.to_string(),
                workspace.marker(),
            ]
        );
    }

    #[test]
    fn test_run_command_network_opt_in() {
        let config = SandboxConfig {
            network: true,
            ..make_config()
        };
        let sandbox = ContainerSandbox::new(config);
        let workspace = Workspace::prepare("result = 1").unwrap();
        let args = args_of(&sandbox.build_run_command(&workspace, "c"));
        assert!(!args.contains(&"--network".to_string()));
    }

    #[test]
    fn test_run_command_does_not_forward_host_env() {
        let sandbox = ContainerSandbox::new(make_config());
        let workspace = Workspace::prepare("result = 1").unwrap();
        let args = args_of(&sandbox.build_run_command(&workspace, "c"));
        let env_args: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "-e")
            .map(|w| &w[1])
            .collect();
        assert_eq!(env_args, vec!["HOME=/tmp"]);
    }

    #[test]
    fn test_missing_runtime_is_error() {
        let config = SandboxConfig {
            runtime: "codeact-no-such-runtime".to_string(),
            ..make_config()
        };
        let sandbox = ContainerSandbox::new(config);
        let err = sandbox.execute("result = 1").unwrap_err();
        assert!(err.to_string().contains("runtime not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_image_present() {
        // `true image inspect ...` succeeds, so nothing is pulled
        assert!(ensure_image("true", "python:3.12-slim").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_image_failed_pull_is_error() {
        let err = ensure_image("false", "python:3.12-slim").unwrap_err();
        assert!(err.to_string().contains("Failed to pull image python:3.12-slim"));
    }

    #[test]
    fn test_ensure_image_missing_runtime_is_error() {
        let err = ensure_image("codeact-no-such-runtime", "python:3.12-slim").unwrap_err();
        assert!(err.to_string().contains("codeact-no-such-runtime pull"));
    }

    #[test]
    fn test_runtime_exit_codes_are_fatal() {
        for code in RUNTIME_FAILURE_CODES {
            let raw = RawRun {
                stdout: "",
                stderr: "Unable to find image\n",
                exit_code: Some(code),
            };
            let err = classify_missing_outcome(&raw, "docker", "python:3.12-slim").unwrap_err();
            assert!(err.to_string().contains("could not run image"));
            assert!(err.to_string().contains("Unable to find image"));
        }
    }

    #[test]
    fn test_oom_kill_is_candidate_failure() {
        let raw = RawRun {
            stdout: "",
            stderr: "",
            exit_code: Some(137),
        };
        let outcome = classify_missing_outcome(&raw, "docker", "python:3.12-slim").unwrap();
        assert_eq!(outcome.failure().unwrap().kind, "SandboxExit");
    }
}
