//! Generative-model access: text generation and embeddings.
//!
//! [`LanguageModel`] is the provider seam, with implementations for an
//! OpenAI-compatible API ([`OpenAiModel`]), a local Ollama instance
//! ([`OllamaModel`]) and a [`DisabledModel`] that refuses every call.
//! [`create_model`] picks one from `[llm]` config.
//!
//! [`SummaryClient`] is what the pipeline and the commit sync engine use.
//! It bounds prompt size, turns summarization failures into an empty
//! string, and wraps each call in a `summarize` / `embed` tracing span.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use repo_harness_core::text::truncate_chars;

use crate::config::LlmConfig;
use crate::error::IngestError;

/// A generative-model provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier reported in logs.
    fn name(&self) -> &str;

    /// Single-turn completion with a system instruction.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the configured provider with its own HTTP client.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build LLM HTTP client")
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| anyhow::anyhow!("llm.{} required", field))
}

fn check_dims(vector: &[f32], dims: Option<usize>) -> Result<()> {
    if let Some(expected) = dims {
        if vector.len() != expected {
            anyhow::bail!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                expected
            );
        }
    }
    Ok(())
}

async fn provider_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if status == 429 {
        IngestError::RateLimited {
            message: format!("{}: {}", provider, body),
        }
        .into()
    } else {
        IngestError::Provider {
            status,
            message: format!("{}: {}", provider, body),
        }
        .into()
    }
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

fn messages(system: &str, prompt: &str) -> Vec<Message> {
    vec![
        Message {
            role: "system".to_string(),
            content: system.to_string(),
        },
        Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        },
    ]
}

// ============ Disabled ============

/// Refuses every call with [`IngestError::ModelDisabled`].
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
        Err(IngestError::ModelDisabled.into())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(IngestError::ModelDisabled.into())
    }
}

// ============ OpenAI-compatible ============

/// Chat completions and embeddings over `POST /v1/...`.
pub struct OpenAiModel {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    dims: Option<usize>,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            chat_model: required(&config.chat_model, "chat_model")?,
            embedding_model: required(&config.embedding_model, "embedding_model")?,
            dims: config.dims,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Message,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.chat_model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let req = OpenAiChatRequest {
            model: self.chat_model.clone(),
            messages: messages(system, prompt),
        };
        let response = self
            .post("/v1/chat/completions")
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI chat API")?;
        if !response.status().is_success() {
            return Err(provider_error("OpenAI chat", response).await);
        }

        let body: OpenAiChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI chat response")?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("OpenAI chat response had no choices")
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let req = OpenAiEmbedRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response = self
            .post("/v1/embeddings")
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;
        if !response.status().is_success() {
            return Err(provider_error("OpenAI embed", response).await);
        }

        let body: OpenAiEmbedResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .unwrap_or_default();
        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

// ============ Ollama ============

/// Chat and embeddings against a local Ollama (`/api/chat`, `/api/embed`).
pub struct OllamaModel {
    http: reqwest::Client,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    dims: Option<usize>,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            chat_model: required(&config.chat_model, "chat_model")?,
            embedding_model: required(&config.embedding_model, "embedding_model")?,
            dims: config.dims,
        })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn name(&self) -> &str {
        &self.chat_model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let req = OllamaChatRequest {
            model: self.chat_model.clone(),
            messages: messages(system, prompt),
            stream: false,
        };
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&req)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.base_url))?;
        if !response.status().is_success() {
            return Err(provider_error("Ollama chat", response).await);
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama chat response")?;
        Ok(body.message.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let req = OllamaEmbedRequest {
            model: &self.embedding_model,
            input: text,
            truncate: true,
        };
        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&req)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.base_url))?;
        if !response.status().is_success() {
            return Err(provider_error("Ollama embed", response).await);
        }

        let body: OllamaEmbedResponse = response
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;
        let vector = body.embeddings.into_iter().next().unwrap_or_default();
        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

// ============ Summary client ============

/// What a piece of text is, which selects the summarization prompt.
#[derive(Debug, Clone, Copy)]
pub enum SummaryKind<'a> {
    File { path: &'a str },
    CommitDiff,
}

impl SummaryKind<'_> {
    fn label(&self) -> &'static str {
        match self {
            SummaryKind::File { .. } => "file",
            SummaryKind::CommitDiff => "commit_diff",
        }
    }
}

const FILE_SYSTEM_PROMPT: &str = "You are a senior software engineer helping a new teammate \
get oriented in an unfamiliar codebase. Explain what a file is for and how it fits into the \
project in plain language, in no more than 100 words.";

const DIFF_SYSTEM_PROMPT: &str = "You are an expert programmer summarizing a git diff. Lines \
starting with '+' were added, lines starting with '-' were removed, other lines are context. \
Reply with a few short bullet points describing the most important changes and the files they \
touch. Do not repeat the diff.";

/// Summaries and embeddings with bounded input and non-fatal summarization.
pub struct SummaryClient {
    model: Arc<dyn LanguageModel>,
    max_chars: usize,
    trace_io: bool,
}

impl SummaryClient {
    pub fn new(model: Arc<dyn LanguageModel>, max_chars: usize, trace_io: bool) -> Self {
        Self {
            model,
            max_chars,
            trace_io,
        }
    }

    /// Summarize `text`, ignoring anything past `max_chars` characters.
    ///
    /// Returns an empty string if the provider fails.
    pub async fn summarize(&self, text: &str, kind: SummaryKind<'_>) -> String {
        let input = truncate_chars(text, self.max_chars);
        let (system, prompt) = match kind {
            SummaryKind::File { path } => (
                FILE_SYSTEM_PROMPT,
                format!("File: {}\n\n```\n{}\n```", path, input),
            ),
            SummaryKind::CommitDiff => (DIFF_SYSTEM_PROMPT, input.to_string()),
        };

        let span = tracing::info_span!(
            "summarize",
            kind = kind.label(),
            model = self.model.name(),
            input_chars = input.chars().count(),
            output_chars = tracing::field::Empty,
        );
        if self.trace_io {
            tracing::debug!(parent: &span, input = %prompt, "summarize input");
        }

        let result = self
            .model
            .generate(system, &prompt)
            .instrument(span.clone())
            .await;

        match result {
            Ok(summary) => {
                span.record("output_chars", summary.chars().count());
                if self.trace_io {
                    tracing::debug!(parent: &span, output = %summary, "summarize output");
                }
                summary
            }
            Err(e) => {
                tracing::warn!(parent: &span, error = %e, "summarization failed");
                String::new()
            }
        }
    }

    /// Embed `text`. Errors propagate to the caller.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let span = tracing::info_span!(
            "embed",
            input_chars = text.chars().count(),
            dims = tracing::field::Empty,
        );
        if self.trace_io {
            tracing::debug!(parent: &span, input = %text, "embed input");
        }

        let vector = self.model.embed(text).instrument(span.clone()).await?;
        span.record("dims", vector.len());
        Ok(vector)
    }
}
