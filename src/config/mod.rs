//! Configuration system for OntoTree
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/ontotree/config.{ONTOTREE_ENV}.json
//! 3. Default values
//!
//! Where ONTOTREE_ENV can be: production (default), development, test
//!
//! # Examples
//!
//! ```no_run
//! use ontotree::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! println!("Summaries via {} ({})", config.model.model, config.model.provider);
//! println!("Round ceiling: {}", config.engine.driver.max_rounds);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - ONTOTREE_OLLAMA_URL
//! - ONTOTREE_MODEL
//! - ONTOTREE_MAX_ROUNDS
//! - ONTOTREE_SEED
//! - ONTOTREE_STRICT_MEMBERS

use crate::raptor::builder::EngineConfig;
use crate::raptor::summarizer::DistillLimits;
use crate::raptor::tree::MemberPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Supported model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Ollama,
    OpenAI,
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown provider: {}",
                s
            ))),
        }
    }
}

/// Configuration for the summarization model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ModelProvider,

    /// API URL (for Ollama) or base URL
    #[serde(default = "default_ollama_url")]
    pub url: String,

    pub model: String,

    /// API key (can be environment variable name like "OPENAI_API_KEY")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top P sampling (0.0 - 1.0)
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.6
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Ollama,
            url: default_ollama_url(),
            model: "qwen3:8b".to_string(),
            api_key: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::ValidationError(format!(
                "Top P must be between 0.0 and 1.0, got {}",
                self.top_p
            )));
        }

        if self.url.is_empty() {
            return Err(ConfigError::ValidationError("URL cannot be empty".to_string()));
        }

        if self.model.is_empty() {
            return Err(ConfigError::ValidationError(
                "Model name cannot be empty".to_string(),
            ));
        }

        if self.provider != ModelProvider::Ollama && self.api_key.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "API key required for {} provider",
                self.provider
            )));
        }

        Ok(())
    }

    /// Resolve API key from environment variable if needed
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.as_ref().and_then(|key| {
            // If the key looks like an env var name, try to resolve it
            if key.chars().all(|c| c.is_uppercase() || c == '_') {
                std::env::var(key).ok()
            } else {
                Some(key.clone())
            }
        })
    }
}

/// Input preparation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Paragraphs shorter than this are merged into the next one
    #[serde(default = "default_merge_min_words")]
    pub merge_min_words: usize,

    /// Character cap for offline summaries
    #[serde(default = "default_passthrough_chars")]
    pub passthrough_chars: usize,

    /// Longest passage sent to the model, in characters
    #[serde(default = "default_llm_max_chars")]
    pub llm_max_chars: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,

    #[serde(default = "default_keyword_max_tokens")]
    pub keyword_max_tokens: usize,
}

fn default_merge_min_words() -> usize {
    200
}

fn default_passthrough_chars() -> usize {
    600
}

fn default_llm_max_chars() -> usize {
    8000
}

fn default_summary_max_tokens() -> usize {
    512
}

fn default_keyword_max_tokens() -> usize {
    16
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            merge_min_words: default_merge_min_words(),
            passthrough_chars: default_passthrough_chars(),
            llm_max_chars: default_llm_max_chars(),
            summary_max_tokens: default_summary_max_tokens(),
            keyword_max_tokens: default_keyword_max_tokens(),
        }
    }
}

impl InputConfig {
    /// Limits applied by [`LlmDistiller`](crate::raptor::LlmDistiller)
    pub fn distill_limits(&self) -> DistillLimits {
        DistillLimits {
            max_chars: self.llm_max_chars,
            summary_tokens: self.summary_max_tokens,
            keyword_tokens: self.keyword_max_tokens,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("passthrough_chars", self.passthrough_chars),
            ("llm_max_chars", self.llm_max_chars),
            ("summary_max_tokens", self.summary_max_tokens),
            ("keyword_max_tokens", self.keyword_max_tokens),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used for summaries and keywords
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub input: InputConfig,
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/ontotree/config.{ONTOTREE_ENV}.json
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        let env = std::env::var("ONTOTREE_ENV").unwrap_or_else(|_| "production".to_string());

        if let Some(config_dir) = Self::config_dir() {
            let config_path = config_dir.join(format!("config.{}.json", env));

            if config_path.exists() {
                tracing::info!("Loading config from: {:?}", config_path);
                return Self::from_file(&config_path);
            }
        }

        tracing::info!("Using default configuration with environment overrides");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup. Unparseable numbers are ignored
    /// with a warning.
    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ONTOTREE_OLLAMA_URL") {
            if self.model.provider == ModelProvider::Ollama {
                self.model.url = url;
            }
        }

        if let Some(model) = lookup("ONTOTREE_MODEL") {
            self.model.model = model;
        }

        if let Some(rounds) = lookup("ONTOTREE_MAX_ROUNDS") {
            match rounds.parse() {
                Ok(n) => self.engine.driver.max_rounds = n,
                Err(_) => tracing::warn!("Ignoring invalid ONTOTREE_MAX_ROUNDS: {}", rounds),
            }
        }

        if let Some(seed) = lookup("ONTOTREE_SEED") {
            match seed.parse() {
                Ok(n) => self.engine.clusterer.seed = n,
                Err(_) => tracing::warn!("Ignoring invalid ONTOTREE_SEED: {}", seed),
            }
        }

        if let Some(strict) = lookup("ONTOTREE_STRICT_MEMBERS") {
            let strict = strict.eq_ignore_ascii_case("true")
                || strict == "1"
                || strict.eq_ignore_ascii_case("yes");
            self.engine.driver.member_policy = if strict {
                MemberPolicy::Strict
            } else {
                MemberPolicy::Lenient
            };
        }

        // API keys are resolved on-demand via resolve_api_key()
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;

        if self.engine.driver.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "max_rounds must be greater than 0".to_string(),
            ));
        }

        if self.engine.clusterer.max_iter == 0 {
            return Err(ConfigError::ValidationError(
                "max_iter must be greater than 0".to_string(),
            ));
        }

        if self.engine.clusterer.n_init == 0 {
            return Err(ConfigError::ValidationError(
                "n_init must be greater than 0".to_string(),
            ));
        }

        let tol = self.engine.clusterer.tol;
        if tol.is_nan() || tol < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "tol must be non-negative, got {}",
                tol
            )));
        }

        self.engine
            .selector
            .validate()
            .map_err(ConfigError::ValidationError)?;

        self.input.validate()?;

        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ontotree"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
