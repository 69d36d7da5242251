//! codeact - LLM code generation with sandboxed execution and retry
//!
//! Turns a plain-language instruction into a Python snippet via an LLM,
//! runs it in an isolated sandbox (container or isolated host process), and
//! regenerates on failure up to a fixed number of execution attempts.
//! Supports multiple LLM providers (OpenAI, Anthropic, Gemini, Ollama).

pub mod agent;
pub mod cli;
pub mod config;
pub mod llm;
pub mod util;
