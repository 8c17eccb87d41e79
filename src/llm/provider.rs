//! Model providers for leaf distillation
//!
//! Every call is a [`CompletionRequest`]: a system instruction, the passage
//! and a token budget that depends on whether a summary or a keyword is
//! wanted. Each backend turns that into its own wire request.
//!
//! Supports:
//! - Ollama (local models, `/api/generate`)
//! - OpenAI-compatible chat completion APIs
//!
//! # Examples
//!
//! ```no_run
//! use ontotree::config::ModelConfig;
//! use ontotree::llm::{create_provider, CompletionRequest, Task};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = create_provider(ModelConfig::default())?;
//! provider.validate_connection().await?;
//! let request = CompletionRequest::new(Task::Keyword, "Reply with one keyword.", "Rust ownership rules", 16);
//! let completion = provider.complete(&request).await?;
//! println!("{}", completion.text);
//! # Ok(())
//! # }
//! ```

use crate::config::{ModelConfig, ModelProvider as ProviderType};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} is unreachable at {url}: {source}")]
    Unreachable {
        provider: ProviderType,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0} rejected the API key")]
    Unauthorized(ProviderType),

    #[error("no API key configured for {0}")]
    MissingApiKey(ProviderType),

    #[error("{provider} answered HTTP {status}: {body}")]
    Status {
        provider: ProviderType,
        status: StatusCode,
        body: String,
    },

    #[error("model '{model}' is not available on {provider}")]
    ModelNotFound { provider: ProviderType, model: String },

    #[error("{0} returned no completion")]
    EmptyCompletion(ProviderType),

    #[error("Malformed response: {0}")]
    Malformed(#[from] reqwest::Error),
}

/// What the completion is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Condensed passage stored as node content
    Summary,
    /// Short topic label stored as node keyword
    Keyword,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Summary => write!(f, "summary"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub task: Task,
    pub system: String,
    pub passage: String,
    /// Output budget in tokens
    pub max_tokens: usize,
}

impl CompletionRequest {
    pub fn new(
        task: Task,
        system: impl Into<String>,
        passage: impl Into<String>,
        max_tokens: usize,
    ) -> Self {
        Self {
            task,
            system: system.into(),
            passage: passage.into(),
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    /// The model stopped at the token budget
    pub truncated: bool,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Check that the server answers and can serve the configured model
    async fn validate_connection(&self) -> Result<(), ProviderError>;

    fn model_name(&self) -> &str;

    fn provider_type(&self) -> ProviderType;
}

/// Create a model provider from configuration
pub fn create_provider(config: ModelConfig) -> Result<Box<dyn ModelProvider>, ProviderError> {
    match config.provider {
        ProviderType::Ollama => Ok(Box::new(OllamaProvider::new(config))),
        ProviderType::OpenAI => Ok(Box::new(OpenAIProvider::new(config)?)),
    }
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_default()
}

/// Join a base URL and a path without doubling the slash.
fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Request budget clamped by the configured ceiling, if any.
fn token_budget(config: &ModelConfig, request: &CompletionRequest) -> usize {
    config
        .max_tokens
        .map_or(request.max_tokens, |ceiling| ceiling.min(request.max_tokens))
}

/// Map auth failures and other non-2xx answers to provider errors.
async fn check_status(provider: ProviderType, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProviderError::Unauthorized(provider));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            provider,
            status,
            body,
        });
    }
    Ok(response)
}

// ============================================================================
// Ollama Provider
// ============================================================================

pub struct OllamaProvider {
    config: ModelConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    model: String,
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.config.model,
            system: &request.system,
            prompt: &request.passage,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: token_budget(&self.config, request),
            },
        }
    }

    /// `qwen3` matches a pulled `qwen3:latest`; tagged names must match exactly.
    fn model_is_listed(&self, names: &[String]) -> bool {
        let wanted = &self.config.model;
        names.iter().any(|name| {
            name == wanted || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted))
        })
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let url = endpoint(&self.config.url, "api/generate");
        let response = self
            .client
            .post(&url)
            .json(&self.build_request(request))
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|source| ProviderError::Unreachable {
                provider: ProviderType::Ollama,
                url: url.clone(),
                source,
            })?;
        let body: GenerateResponse = check_status(ProviderType::Ollama, response)
            .await?
            .json()
            .await?;

        tracing::debug!(
            "Ollama {} for {}: {} chars",
            request.task,
            body.model,
            body.response.len()
        );
        Ok(Completion {
            truncated: body.done_reason.as_deref() == Some("length"),
            text: body.response,
            model: body.model,
        })
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let url = endpoint(&self.config.url, "api/tags");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ProviderError::Unreachable {
                provider: ProviderType::Ollama,
                url: url.clone(),
                source,
            })?;
        let tags: TagsResponse = check_status(ProviderType::Ollama, response)
            .await?
            .json()
            .await?;

        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        if !self.model_is_listed(&names) {
            return Err(ProviderError::ModelNotFound {
                provider: ProviderType::Ollama,
                model: self.config.model.clone(),
            });
        }
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }
}

// ============================================================================
// OpenAI-compatible Provider
// ============================================================================

pub struct OpenAIProvider {
    config: ModelConfig,
    client: Client,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(config: ModelConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolve_api_key()
            .ok_or(ProviderError::MissingApiKey(ProviderType::OpenAI))?;

        Ok(Self {
            config,
            client: http_client(),
            api_key,
        })
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.passage,
                },
            ],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: token_budget(&self.config, request),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let url = endpoint(&self.config.url, "chat/completions");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|source| ProviderError::Unreachable {
                provider: ProviderType::OpenAI,
                url: url.clone(),
                source,
            })?;
        let body: ChatResponse = check_status(ProviderType::OpenAI, response)
            .await?
            .json()
            .await?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyCompletion(ProviderType::OpenAI))?;
        let text = choice
            .message
            .content
            .ok_or(ProviderError::EmptyCompletion(ProviderType::OpenAI))?;

        Ok(Completion {
            truncated: choice.finish_reason.as_deref() == Some("length"),
            text,
            model: body.model,
        })
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let url = endpoint(&self.config.url, "models");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|source| ProviderError::Unreachable {
                provider: ProviderType::OpenAI,
                url: url.clone(),
                source,
            })?;
        check_status(ProviderType::OpenAI, response).await?;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }
}
