use serde::Serialize;
use serde_json::Value;

use super::executor::ExecutionFailure;

/// Position of the generate/execute loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Generating,
    Executing,
    Succeeded,
    FailedTerminal,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Succeeded | LoopState::FailedTerminal)
    }
}

/// The record threaded through every step of one run.
///
/// Fields are private so the invariants hold by construction: after an
/// execution step exactly one of `result` / `failure` is set, and
/// `attempt_count` only ever moves up, by one per failed execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskState {
    instruction: String,
    candidate: Option<String>,
    result: Option<Value>,
    failure: Option<ExecutionFailure>,
    attempt_count: u32,
}

impl TaskState {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            candidate: None,
            result: None,
            failure: None,
            attempt_count: 0,
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        self.failure.as_ref()
    }

    /// Number of failed executions so far
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Replace the candidate with freshly generated code.
    pub fn set_candidate(&mut self, code: String) {
        self.candidate = Some(code);
    }

    pub fn record_success(&mut self, value: Value) {
        self.result = Some(value);
        self.failure = None;
    }

    pub fn record_failure(&mut self, failure: ExecutionFailure) {
        self.result = None;
        self.failure = Some(failure);
        self.attempt_count += 1;
    }
}
