//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/rh.sqlite"
//!
//! [github]
//! api_url = "https://api.github.com"
//! loader_concurrency = 4
//!
//! [llm]
//! provider = "openai"
//! base_url = "https://api.openai.com"
//! chat_model = "gpt-4o-mini"
//! embedding_model = "text-embedding-3-small"
//! dims = 1536
//!
//! [pipeline]
//! batch_size = 5
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! Secrets are resolved once, in [`load_config`]: a missing
//! `github.token` falls back to `GITHUB_TOKEN` and a missing
//! `llm.api_key` falls back to `OPENAI_API_KEY`. Nothing reads the
//! environment after that.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Shared service token, used when the acting user has none stored.
    #[serde(default)]
    pub token: Option<String>,
    /// Maximum concurrent subtree/file requests while loading a repository.
    #[serde(default = "default_loader_concurrency")]
    pub loader_concurrency: usize,
    /// Paths skipped at ingestion time (not at estimation time).
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token: None,
            loader_concurrency: default_loader_concurrency(),
            ignore_globs: default_ignore_globs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_loader_concurrency() -> usize {
    4
}
fn default_ignore_globs() -> Vec<String> {
    vec![
        "**/package-lock.json".to_string(),
        "**/yarn.lock".to_string(),
        "**/pnpm-lock.yaml".to_string(),
        "**/bun.lockb".to_string(),
    ]
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Record prompt inputs and model outputs on tracing spans (DEBUG).
    #[serde(default)]
    pub trace_io: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            base_url: None,
            chat_model: None,
            embedding_model: None,
            dims: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            trace_io: false,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Content beyond this many characters is not sent for summarization.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    #[serde(default = "default_commits_per_branch")]
    pub commits_per_branch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            summary_max_chars: default_summary_max_chars(),
            commits_per_branch: default_commits_per_branch(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_summary_max_chars() -> usize {
    10_000
}
fn default_commits_per_branch() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaskConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// A configuration with every optional section at its default and the
    /// given database path. Used by tests and embedding callers.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            github: GithubConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            tasks: TaskConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            anyhow::bail!("pipeline.batch_size must be > 0");
        }
        if self.pipeline.summary_max_chars == 0 {
            anyhow::bail!("pipeline.summary_max_chars must be > 0");
        }
        if self.pipeline.commits_per_branch == 0 {
            anyhow::bail!("pipeline.commits_per_branch must be > 0");
        }
        if self.github.loader_concurrency == 0 {
            anyhow::bail!("github.loader_concurrency must be > 0");
        }
        if self.tasks.queue_capacity == 0 {
            anyhow::bail!("tasks.queue_capacity must be > 0");
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        if self.llm.is_enabled() {
            if self.llm.chat_model.is_none() {
                anyhow::bail!(
                    "llm.chat_model must be specified when provider is '{}'",
                    self.llm.provider
                );
            }
            if self.llm.embedding_model.is_none() {
                anyhow::bail!(
                    "llm.embedding_model must be specified when provider is '{}'",
                    self.llm.provider
                );
            }
            if self.llm.dims == Some(0) {
                anyhow::bail!("llm.dims must be > 0 when set");
            }
        }

        Ok(())
    }
}

/// Parse configuration text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Read, parse, and validate a configuration file, then fill secrets
/// from the environment where the file leaves them unset.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if config.github.token.is_none() {
        config.github.token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
    }
    if config.llm.api_key.is_none() && config.llm.provider == "openai" {
        config.llm.api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
    }

    Ok(config)
}
