use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod agent;
mod cli;
mod config;
mod llm;
mod util;

#[derive(Parser)]
#[command(name = "codeact", version)]
#[command(about = "Generate Python for a task with an LLM and run it in a sandbox, retrying on failure", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generate/execute loop for one instruction
    Run {
        /// Task in plain language (defaults to a built-in example)
        instruction: Option<String>,

        /// Path to config file (defaults to ./codeact.toml or ~/.config/codeact/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Override LLM model (e.g., "gpt-4o", "claude-sonnet-4-5-20250929")
        #[arg(long)]
        model: Option<String>,

        /// Override LLM provider (anthropic, openai, openai-compatible, gemini)
        #[arg(long)]
        provider: Option<String>,

        /// Override base URL for openai-compatible providers
        #[arg(long)]
        base_url: Option<String>,

        /// Override the number of execution attempts (default: from config)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Sandbox kind: container or process
        #[arg(long)]
        sandbox: Option<String>,

        /// Container runtime (docker, podman)
        #[arg(long)]
        runtime: Option<String>,

        /// Per-execution timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Include the previous failure in retry prompts
        #[arg(long)]
        feedback: bool,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,

        /// Use mock LLM client for testing
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration, API key and sandbox availability
    Check {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the result
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            instruction,
            config,
            model,
            provider,
            base_url,
            max_attempts,
            sandbox,
            runtime,
            timeout,
            feedback,
            json,
            dry_run,
        } => {
            let overrides = cli::run::Overrides {
                provider,
                model,
                base_url,
                max_attempts,
                sandbox,
                runtime,
                timeout,
                feedback,
            };
            cli::run::run(instruction, config, overrides, json, dry_run).await?;
        }
        Commands::Check { config } => {
            cli::check::run(config)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "codeact", &mut std::io::stdout());
        }
    }

    Ok(())
}
