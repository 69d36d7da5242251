use anyhow::Result;

use super::client::LlmClient;
use super::client::MockLlmClient;
use super::client_impl::{AnthropicClient, GeminiClient, OpenAIClient};
use crate::config::{LlmConfig, Provider};

const DEFAULT_COMPATIBLE_BASE_URL: &str = "http://localhost:11434/v1";

/// Create an LLM client from LlmConfig. `dry_run` bypasses the network entirely.
pub fn create_client(llm_config: &LlmConfig, dry_run: bool) -> Result<Box<dyn LlmClient>> {
    if dry_run {
        return Ok(Box::new(MockLlmClient::new()));
    }

    let api_key = llm_config.get_api_key()?;
    let max_tokens = llm_config.get_max_tokens();
    let timeout = llm_config.timeout_secs;
    let model = llm_config.model.clone();

    match llm_config.provider {
        Provider::Anthropic => Ok(Box::new(
            AnthropicClient::new(api_key, model, max_tokens, timeout)?
                .with_temperature(llm_config.temperature),
        )),

        Provider::OpenAI => Ok(Box::new(
            OpenAIClient::new(api_key, model, max_tokens, timeout)?
                .with_temperature(llm_config.temperature),
        )),

        Provider::OpenAICompatible => {
            let base_url = llm_config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPATIBLE_BASE_URL.to_string());

            Ok(Box::new(
                OpenAIClient::with_base_url(api_key, model, base_url, max_tokens, timeout)?
                    .with_temperature(llm_config.temperature),
            ))
        }

        Provider::Gemini => Ok(Box::new(
            GeminiClient::new(api_key, model, max_tokens, timeout)?
                .with_temperature(llm_config.temperature),
        )),
    }
}
