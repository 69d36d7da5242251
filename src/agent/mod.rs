// Code-act agent: generate Python for an instruction, run it in a sandbox,
// and regenerate on failure until it succeeds or the attempt budget is spent.

pub mod code_generator;
pub mod container_executor;
pub mod controller;
pub mod executor;
pub mod extractor;
pub mod harness;
pub mod state;

pub use code_generator::{generation_step, PythonCodeGenerator};
pub use container_executor::ContainerSandbox;
pub use controller::{AttemptRecord, CodeActAgent, RetryPolicy, RunReport};
pub use executor::{execution_step, ExecutionFailure, ExecutionOutcome, ProcessSandbox};
pub use extractor::extract_code;
pub use state::{LoopState, TaskState};

use anyhow::Result;

use crate::config::{SandboxConfig, SandboxKind};

/// Produces candidate source code for the current state.
#[async_trait::async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, state: &TaskState) -> Result<String>;
}

/// Runs one candidate in isolation.
///
/// Candidate errors (exceptions, timeouts, crashes) come back as
/// `Ok(ExecutionOutcome::Failure)`. `Err` is for a sandbox that could not
/// run anything at all.
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, code: &str) -> Result<ExecutionOutcome>;
}

pub fn create_sandbox(config: &SandboxConfig) -> Box<dyn Sandbox> {
    match config.kind {
        SandboxKind::Container => Box::new(ContainerSandbox::new(config.clone())),
        SandboxKind::Process => Box::new(ProcessSandbox::from_config(config)),
    }
}
