use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::config::{Config, LlmConfig, Provider, SandboxConfig, SandboxKind};
use crate::util::binary_available;

struct CheckResult {
    passed: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl CheckResult {
    fn new() -> Self {
        Self {
            passed: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn pass(&mut self, msg: impl Into<String>) {
        self.passed.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }
}

pub fn run(config_path: Option<String>) -> Result<()> {
    let mut results = CheckResult::new();

    check_dotenv(super::load_dotenv(), &mut results);

    // 1. Load config
    let config = match Config::load_with_path(config_path.clone()) {
        Ok(config) => {
            let source = config_path.as_deref().unwrap_or("default search path");
            results.pass(format!("Config loaded from {}", source));
            config
        }
        Err(e) => {
            // Reported through print_results, not propagated (would double-print)
            results.error(format!("Failed to load config: {:#}", e));
            print_results(&results);
            return Ok(());
        }
    };

    // 2. LLM provider and key
    results.pass(format!(
        "LLM provider: {} (model: {})",
        config.llm.provider, config.llm.model
    ));
    check_api_key(&config.llm, &mut results);

    if config.llm.provider == Provider::OpenAICompatible && config.llm.base_url.is_none() {
        results.warn(
            "openai-compatible provider without base_url, will use default http://localhost:11434/v1",
        );
    }

    // 3. Loop settings
    results.pass(format!(
        "Agent: max_attempts={}, failure feedback {}",
        config.agent.max_attempts,
        if config.agent.include_failure_feedback {
            "on"
        } else {
            "off"
        }
    ));

    // 4. Sandbox
    check_sandbox(&config.sandbox, &mut results);

    print_results(&results);

    if !results.errors.is_empty() {
        anyhow::bail!("{} config error(s) found", results.errors.len());
    }

    Ok(())
}

fn check_dotenv(outcome: Result<Option<PathBuf>>, results: &mut CheckResult) {
    match outcome {
        Ok(Some(path)) => results.pass(format!("Environment loaded from {}", path.display())),
        Ok(None) => {}
        Err(e) => results.error(format!("{:#}", e)),
    }
}

fn check_api_key(llm: &LlmConfig, results: &mut CheckResult) {
    let (env_var, inferred) = match llm.api_key_env.as_deref() {
        Some(var) => (var, ""),
        None => (llm.provider.default_api_key_env(), " (inferred from provider)"),
    };

    if env_var.eq_ignore_ascii_case("none") {
        results.pass("API key: no API key needed");
        return;
    }

    let is_oai_compat = llm.provider == Provider::OpenAICompatible;
    match env::var(env_var) {
        Ok(v) if !v.trim().is_empty() => {
            results.pass(format!("API key: {} is set{}", env_var, inferred));
        }
        Ok(_) if is_oai_compat => results.warn(format!(
            "API key: {} is set but empty (OK for local models, needed for gateways)",
            env_var
        )),
        Ok(_) => results.error(format!("API key: {} is set but empty{}", env_var, inferred)),
        Err(_) if is_oai_compat => results.warn(format!(
            "API key: {} is not set (OK for local models, needed for gateways)",
            env_var
        )),
        Err(_) => results.error(format!("API key: {} is not set{}", env_var, inferred)),
    }
}

fn check_sandbox(sandbox: &SandboxConfig, results: &mut CheckResult) {
    match sandbox.kind {
        SandboxKind::Container => {
            if binary_available(&sandbox.runtime) {
                results.pass(format!(
                    "Sandbox: container via {} (image: {})",
                    sandbox.runtime, sandbox.image
                ));
            } else {
                results.error(format!(
                    "Container runtime '{}' not found, install it or use --sandbox process",
                    sandbox.runtime
                ));
            }
            if sandbox.network {
                results.warn("Container network access is enabled");
            }
        }
        SandboxKind::Process => {
            if binary_available(&sandbox.interpreter) {
                results.pass(format!("Sandbox: host process via {}", sandbox.interpreter));
            } else {
                results.error(format!("Interpreter '{}' not found", sandbox.interpreter));
            }
            results.warn("Process sandbox does not restrict network or filesystem access");
        }
    }

    if sandbox.timeout_secs > 300 {
        results.warn(format!(
            "Sandbox timeout {}s is very long for a single candidate",
            sandbox.timeout_secs
        ));
    }
}

fn print_results(results: &CheckResult) {
    println!();
    for msg in &results.passed {
        println!("  \u{2713} {}", msg);
    }
    for msg in &results.warnings {
        println!("  ! {}", msg);
    }
    for msg in &results.errors {
        println!("  \u{2717} {}", msg);
    }
    println!();
    println!(
        "{} passed, {} warnings, {} errors",
        results.passed.len(),
        results.warnings.len(),
        results.errors.len()
    );
}
