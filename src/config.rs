use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Supported text-generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "openai-compatible")]
    OpenAICompatible,
    Gemini,
}

impl Provider {
    /// Env var consulted when `api_key_env` is not configured
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::OpenAICompatible => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::OpenAICompatible => "openai-compatible",
            Provider::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAI),
            "openai-compatible" => Ok(Provider::OpenAICompatible),
            "gemini" => Ok(Provider::Gemini),
            other => bail!("Unknown LLM provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    /// Env var holding the API key. "none" means no key (local models).
    /// Unset falls back to the provider's conventional variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// For OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,

    /// Optional: Override max_tokens for LLM requests
    /// If not specified, uses provider-specific defaults:
    /// - anthropic: 4096
    /// - openai: 4096
    /// - openai-compatible (ollama): 16384
    /// - gemini: 8192
    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: f32,

    /// HTTP timeout for a single completion request, in seconds (default: 120)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-4".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            max_tokens: None,
            temperature: 0.0,
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    /// Get max_tokens value, using provider-specific default if not specified
    pub fn get_max_tokens(&self) -> u32 {
        if let Some(tokens) = self.max_tokens {
            return tokens;
        }

        match self.provider {
            Provider::Anthropic => 4096,
            Provider::OpenAI => 4096,
            Provider::OpenAICompatible => 16384, // ollama and similar
            Provider::Gemini => 8192,
        }
    }

    /// Resolve the API key once, at startup.
    pub fn get_api_key(&self) -> Result<String> {
        let env_var = self
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env());

        // Special case: "none" means no API key needed (e.g., Ollama)
        if env_var.eq_ignore_ascii_case("none") {
            return Ok(String::new());
        }

        // openai-compatible: try env var but don't error if missing
        // (local models don't need keys, but gateways like OpenRouter do)
        if self.provider == Provider::OpenAICompatible {
            return Ok(env::var(env_var).unwrap_or_default());
        }

        env::var(env_var)
            .map_err(|_| anyhow::anyhow!("API key not found in environment variable: {}", env_var))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Execution attempts before the run is declared exhausted (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Feed the previous candidate and its failure back into the retry prompt
    #[serde(default)]
    pub include_failure_feedback: bool,

    /// Appended to the generation prompt
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            include_failure_feedback: false,
            custom_instructions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// Throwaway OCI container (docker, podman)
    #[default]
    Container,
    /// Isolated-mode interpreter subprocess on the host
    Process,
}

impl std::str::FromStr for SandboxKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "container" => Ok(SandboxKind::Container),
            "process" => Ok(SandboxKind::Process),
            other => bail!("Unknown sandbox kind: {} (expected container or process)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub kind: SandboxKind,

    /// Container runtime: "docker", "podman", etc. (default: "docker")
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Container image with a Python interpreter (default: "python:3.12-slim")
    #[serde(default = "default_image")]
    pub image: String,

    /// Interpreter binary, inside the container or on the host (default: "python3")
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Wall-clock limit for one execution in seconds (default: 30)
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Container memory limit (default: "256m")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Container CPU quota (default: "1")
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Container process limit (default: 64)
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,

    /// Allow network access inside the container (default: false)
    #[serde(default)]
    pub network: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            kind: SandboxKind::default(),
            runtime: default_runtime(),
            image: default_image(),
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout(),
            memory: default_memory(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
            network: false,
        }
    }
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_memory() -> String {
    "256m".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

fn default_pids_limit() -> u32 {
    64
}

impl Config {
    /// Load configuration from a specific path, or use default search paths
    pub fn load_with_path(path: Option<String>) -> Result<Self> {
        // An explicit path must exist and parse
        if let Some(config_path) = path {
            debug!("Loading config from explicit path: {}", config_path);
            return Self::load_from_path(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path));
        }

        if Path::new("codeact.toml").exists() {
            debug!("Loading config from ./codeact.toml");
            return Self::load_from_path("codeact.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("codeact").join("config.toml");
            if config_path.exists() {
                debug!("Loading config from {:?}", config_path);
                return Self::load_from_path(&config_path);
            }
        }

        debug!("Using default config");
        Ok(Self::default())
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_attempts == 0 {
            bail!("agent.max_attempts must be at least 1");
        }
        if self.sandbox.timeout_secs == 0 {
            bail!("sandbox.timeout_secs must be at least 1");
        }
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be at least 1");
        }
        Ok(())
    }
}
