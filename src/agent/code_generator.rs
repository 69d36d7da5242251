use anyhow::{Context, Result};
use tracing::{debug, info};

use super::extractor::extract_code;
use super::state::TaskState;
use super::CodeGenerator;
use crate::llm::client::LlmClient;
use crate::llm::prompts::{codegen_prompt, PreviousAttempt};

/// Python code generator using LLM
pub struct PythonCodeGenerator<'a> {
    llm_client: &'a dyn LlmClient,
    custom_instructions: Option<String>,
    include_failure_feedback: bool,
}

impl<'a> PythonCodeGenerator<'a> {
    pub fn new(llm_client: &'a dyn LlmClient) -> Self {
        Self {
            llm_client,
            custom_instructions: None,
            include_failure_feedback: false,
        }
    }

    pub fn with_custom_instructions(mut self, instructions: Option<String>) -> Self {
        self.custom_instructions = instructions;
        self
    }

    /// Show the model the last failed candidate and its error on retries.
    pub fn with_failure_feedback(mut self, enabled: bool) -> Self {
        self.include_failure_feedback = enabled;
        self
    }

    fn build_prompt(&self, state: &TaskState) -> String {
        let error_text;
        let previous = match (self.include_failure_feedback, state.candidate(), state.failure()) {
            (true, Some(code), Some(failure)) => {
                error_text = if failure.trace.trim().is_empty() {
                    failure.to_string()
                } else {
                    failure.trace.trim().to_string()
                };
                Some(PreviousAttempt {
                    code,
                    error: &error_text,
                })
            }
            _ => None,
        };

        codegen_prompt(
            state.instruction(),
            previous,
            self.custom_instructions.as_deref(),
        )
    }
}

#[async_trait::async_trait]
impl<'a> CodeGenerator for PythonCodeGenerator<'a> {
    async fn generate(&self, state: &TaskState) -> Result<String> {
        let prompt = self.build_prompt(state);
        debug!("Generation prompt ({} chars)", prompt.len());

        let response = self.llm_client.complete(&prompt).await?;
        Ok(extract_code(&response))
    }
}

/// Generation step: ask for a candidate and store it in `state`.
///
/// Service errors are not retried here; they abort the run.
pub async fn generation_step(generator: &dyn CodeGenerator, state: &mut TaskState) -> Result<()> {
    info!("Generating code (failed attempts so far: {})", state.attempt_count());
    let code = generator
        .generate(state)
        .await
        .context("text-generation service failed")?;
    debug!("Candidate ({} bytes):\n{}", code.len(), code);
    state.set_candidate(code);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::executor::ExecutionFailure;
    use crate::llm::client::MockLlmClient;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every prompt and replies with a fixed response
    struct RecordingClient {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("HTTP 503: upstream unavailable")
        }
    }

    fn failed_state() -> TaskState {
        let mut state = TaskState::new("Divide 1 by 0 safely");
        state.set_candidate("result = 1 / 0".to_string());
        state.record_failure(ExecutionFailure::new(
            "ZeroDivisionError",
            "division by zero",
            "Traceback (most recent call last):\nZeroDivisionError: division by zero",
        ));
        state
    }

    #[tokio::test]
    async fn test_generation_step_stores_extracted_code() {
        let client = MockLlmClient::new();
        let generator = PythonCodeGenerator::new(&client);
        let mut state = TaskState::new("Sum the numbers 1 to 10");

        generation_step(&generator, &mut state).await.unwrap();

        let code = state.candidate().unwrap();
        assert!(code.starts_with("numbers = list(range(1, 11))"));
        assert!(!code.contains("```"));
        assert_eq!(state.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_unfenced_reply_used_verbatim() {
        let client = RecordingClient::new("  result = 3 * 7\n");
        let generator = PythonCodeGenerator::new(&client);
        let mut state = TaskState::new("Multiply 3 by 7");

        generation_step(&generator, &mut state).await.unwrap();
        assert_eq!(state.candidate(), Some("result = 3 * 7"));
    }

    #[tokio::test]
    async fn test_prompt_contains_instruction() {
        let client = RecordingClient::new("result = 1");
        let generator = PythonCodeGenerator::new(&client);
        let state = TaskState::new("Count the vowels in 'banana'");

        generator.generate(&state).await.unwrap();
        assert!(client
            .last_prompt()
            .contains("Write Python code to do the following task:\n\nCount the vowels in 'banana'"));
    }

    #[tokio::test]
    async fn test_retry_prompt_has_no_feedback_by_default() {
        let client = RecordingClient::new("result = 1");
        let generator = PythonCodeGenerator::new(&client);

        generator.generate(&failed_state()).await.unwrap();
        let prompt = client.last_prompt();
        assert!(!prompt.contains("Previous Attempt"));
        assert!(!prompt.contains("division by zero"));
    }

    #[tokio::test]
    async fn test_retry_prompt_with_feedback() {
        let client = RecordingClient::new("result = 1");
        let generator = PythonCodeGenerator::new(&client).with_failure_feedback(true);

        generator.generate(&failed_state()).await.unwrap();
        let prompt = client.last_prompt();
        assert!(prompt.contains("Previous Attempt"));
        assert!(prompt.contains("result = 1 / 0"));
        assert!(prompt.contains("ZeroDivisionError: division by zero"));
    }

    #[tokio::test]
    async fn test_feedback_ignored_on_first_attempt() {
        let client = RecordingClient::new("result = 1");
        let generator = PythonCodeGenerator::new(&client).with_failure_feedback(true);

        generator.generate(&TaskState::new("anything")).await.unwrap();
        assert!(!client.last_prompt().contains("Previous Attempt"));
    }

    #[tokio::test]
    async fn test_custom_instructions_appended() {
        let client = RecordingClient::new("result = 1");
        let generator = PythonCodeGenerator::new(&client)
            .with_custom_instructions(Some("Prefer list comprehensions.".to_string()));

        generator.generate(&TaskState::new("x")).await.unwrap();
        assert!(client.last_prompt().contains("Prefer list comprehensions."));
    }

    #[tokio::test]
    async fn test_service_error_propagates_and_leaves_state() {
        let client = FailingClient;
        let generator = PythonCodeGenerator::new(&client);
        let mut state = TaskState::new("x");

        let err = generation_step(&generator, &mut state).await.unwrap_err();
        assert!(err.to_string().contains("text-generation service failed"));
        assert!(format!("{:#}", err).contains("HTTP 503"));
        assert!(state.candidate().is_none());
    }
}
