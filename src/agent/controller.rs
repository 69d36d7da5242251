use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::code_generator::{generation_step, PythonCodeGenerator};
use super::executor::{execution_step, ExecutionFailure, ExecutionOutcome};
use super::state::{LoopState, TaskState};
use super::{create_sandbox, CodeGenerator, Sandbox};
use crate::config::Config;
use crate::llm::client::LlmClient;
use crate::util::sha256_hex;

/// Decides where the loop goes after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// `max_attempts` is the number of executions allowed; at least one
    /// always happens.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Next state given what the last step left behind.
    ///
    /// Compares against the post-increment `attempt_count`, so exactly
    /// `max_attempts` executions run before giving up.
    pub fn route(&self, state: &TaskState) -> LoopState {
        match (state.result(), state.failure()) {
            (Some(_), _) => LoopState::Succeeded,
            (None, Some(_)) if state.attempt_count() < self.max_attempts => LoopState::Generating,
            (None, Some(_)) => LoopState::FailedTerminal,
            (None, None) => LoopState::Executing,
        }
    }
}

/// One generate-then-execute round trip
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    /// 1-based
    pub attempt: u32,
    pub candidate: String,
    pub candidate_sha256: String,
    pub outcome: ExecutionOutcome,
}

/// Everything a finished run leaves behind
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub final_state: LoopState,
    pub state: TaskState,
    pub attempts: Vec<AttemptRecord>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == LoopState::Succeeded
    }

    /// The bound value on success, the last failure on exhaustion.
    pub fn into_result(self) -> Result<Value, ExecutionFailure> {
        let RunReport { state, .. } = self;
        match (state.result(), state.failure()) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(failure)) => Err(failure.clone()),
            (None, None) => Err(ExecutionFailure::new(
                "NotExecuted",
                "run ended before any candidate was executed",
                String::new(),
            )),
        }
    }
}

/// Drives the generate/execute/retry loop for one instruction at a time.
pub struct CodeActAgent<'a> {
    generator: Box<dyn CodeGenerator + 'a>,
    sandbox: Box<dyn Sandbox>,
    policy: RetryPolicy,
}

impl<'a> CodeActAgent<'a> {
    pub fn new(
        generator: Box<dyn CodeGenerator + 'a>,
        sandbox: Box<dyn Sandbox>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            sandbox,
            policy,
        }
    }

    /// Wire the Python generator and the configured sandbox around `llm_client`.
    pub fn from_config(llm_client: &'a dyn LlmClient, config: &Config) -> Self {
        let generator = PythonCodeGenerator::new(llm_client)
            .with_custom_instructions(config.agent.custom_instructions.clone())
            .with_failure_feedback(config.agent.include_failure_feedback);

        Self::new(
            Box::new(generator),
            create_sandbox(&config.sandbox),
            RetryPolicy::new(config.agent.max_attempts),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the loop to a terminal state.
    ///
    /// Exhaustion is reported through the returned `RunReport`, not as `Err`.
    /// `Err` means the text-generation service or the sandbox itself broke.
    pub async fn run(&self, instruction: &str) -> Result<RunReport> {
        info!(
            "Starting run ({} sandbox, up to {} attempts)",
            self.sandbox.name(),
            self.policy.max_attempts()
        );

        let mut state = TaskState::new(instruction);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut loop_state = LoopState::Generating;

        while !loop_state.is_terminal() {
            loop_state = match loop_state {
                LoopState::Generating => {
                    generation_step(self.generator.as_ref(), &mut state).await?;
                    LoopState::Executing
                }
                LoopState::Executing => {
                    let attempt = attempts.len() as u32 + 1;
                    info!("Attempt {}/{}", attempt, self.policy.max_attempts());

                    let candidate = state.candidate().unwrap_or_default().to_string();
                    let candidate_sha256 = sha256_hex(&candidate);
                    if attempts
                        .iter()
                        .any(|a| a.candidate_sha256 == candidate_sha256)
                    {
                        warn!("Candidate is identical to an earlier failed attempt");
                    }

                    let outcome = execution_step(self.sandbox.as_ref(), &mut state)?;
                    attempts.push(AttemptRecord {
                        attempt,
                        candidate,
                        candidate_sha256,
                        outcome,
                    });
                    self.policy.route(&state)
                }
                terminal => terminal,
            };
        }

        match loop_state {
            LoopState::Succeeded => info!("✓ Succeeded after {} attempt(s)", attempts.len()),
            _ => warn!(
                "✗ Giving up after {} failed attempt(s)",
                state.attempt_count()
            ),
        }

        Ok(RunReport {
            final_state: loop_state,
            state,
            attempts,
        })
    }
}
