use anyhow::Result;
use std::str::FromStr;
use tracing::{debug, info};

use crate::agent::{CodeActAgent, ExecutionOutcome, RunReport};
use crate::config::{Config, Provider, SandboxKind};
use crate::llm::factory;

/// Used when `codeact run` is given no instruction.
pub const DEFAULT_INSTRUCTION: &str =
    "Compute the first 20 Fibonacci numbers and report the list together with its sum.";

/// Command-line values that take precedence over the config file
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub sandbox: Option<String>,
    pub runtime: Option<String>,
    pub timeout: Option<u64>,
    pub feedback: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(ref provider) = self.provider {
            info!("CLI override: provider = {}", provider);
            let previous_default = config.llm.provider.default_api_key_env();
            config.llm.provider = Provider::from_str(provider)?;
            // A key env var that was only the old provider's default follows the new provider
            if config.llm.api_key_env.as_deref() == Some(previous_default) {
                config.llm.api_key_env = None;
            }
        }
        if let Some(ref model) = self.model {
            info!("CLI override: model = {}", model);
            config.llm.model = model.clone();
        }
        if let Some(ref base_url) = self.base_url {
            info!("CLI override: base_url = {}", base_url);
            config.llm.base_url = Some(base_url.clone());
        }
        if let Some(attempts) = self.max_attempts {
            info!("CLI override: max_attempts = {}", attempts);
            config.agent.max_attempts = attempts;
        }
        if let Some(ref kind) = self.sandbox {
            info!("CLI override: sandbox = {}", kind);
            config.sandbox.kind = SandboxKind::from_str(kind)?;
        }
        if let Some(ref runtime) = self.runtime {
            info!("CLI override: runtime = {}", runtime);
            config.sandbox.runtime = runtime.clone();
        }
        if let Some(timeout) = self.timeout {
            info!("CLI override: timeout = {}s", timeout);
            config.sandbox.timeout_secs = timeout;
        }
        if self.feedback {
            info!("CLI override: include_failure_feedback = true");
            config.agent.include_failure_feedback = true;
        }
        Ok(())
    }
}

pub async fn run(
    instruction: Option<String>,
    config_path: Option<String>,
    overrides: Overrides,
    json: bool,
    dry_run: bool,
) -> Result<()> {
    if let Some(path) = super::load_dotenv()? {
        debug!("Loaded environment from {}", path.display());
    }

    let mut config = Config::load_with_path(config_path)?;
    overrides.apply(&mut config)?;
    config.validate()?;

    let instruction = instruction.unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string());
    info!("Instruction: {}", instruction);
    info!(
        "LLM: {} ({}){}",
        config.llm.provider,
        config.llm.model,
        if dry_run { " [dry run]" } else { "" }
    );

    let client = factory::create_client(&config.llm, dry_run)?;
    let agent = CodeActAgent::from_config(client.as_ref(), &config);
    let report = agent.run(&instruction).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_report(&report)?);
    }

    Ok(())
}

/// Human-readable summary printed to stdout
pub fn render_report(report: &RunReport) -> Result<String> {
    let mut out = String::new();

    if let Some(value) = report.state.result() {
        out.push_str("✓ Result:\n");
        out.push_str(&serde_json::to_string_pretty(value)?);
        let printed = report.attempts.last().and_then(|a| match &a.outcome {
            ExecutionOutcome::Success { stdout, .. } if !stdout.is_empty() => Some(stdout),
            _ => None,
        });
        if let Some(printed) = printed {
            out.push_str("\n\nOutput:\n");
            out.push_str(printed);
        }
    } else if let Some(failure) = report.state.failure() {
        out.push_str(&format!(
            "✗ Error after {} attempt(s): {}",
            report.state.attempt_count(),
            failure
        ));
        if !failure.trace.trim().is_empty() {
            out.push_str("\n\nTraceback:\n");
            out.push_str(failure.trace.trim_end());
        }
    } else {
        out.push_str("✗ No attempt was executed");
    }

    Ok(out)
}
