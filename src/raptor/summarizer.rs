use crate::llm::{CompletionRequest, ModelProvider, Task};
use crate::raptor::tree::Fragment;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Turns raw paragraphs into the summary and keyword stored on each leaf.
#[async_trait]
pub trait Distiller: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;

    async fn extract_keyword(&self, text: &str) -> Result<String>;
}

const SUMMARY_INSTRUCTION: &str = "Summarize the passage briefly without losing any \
     important facts, names or dates. Reply with the summary only.";

const KEYWORD_INSTRUCTION: &str = "Give one keyword or short key phrase that captures the \
     core topic of the passage. Reply with the keyword only, nothing else.";

/// Size limits for model-backed distillation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistillLimits {
    /// Longest passage sent to the model, in characters
    pub max_chars: usize,
    pub summary_tokens: usize,
    pub keyword_tokens: usize,
}

impl Default for DistillLimits {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            summary_tokens: 512,
            keyword_tokens: 16,
        }
    }
}

/// Distiller backed by a language model.
pub struct LlmDistiller {
    provider: Box<dyn ModelProvider>,
    limits: DistillLimits,
}

impl LlmDistiller {
    pub fn new(provider: Box<dyn ModelProvider>, limits: DistillLimits) -> Self {
        Self { provider, limits }
    }

    fn clip<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.limits.max_chars) {
            Some((byte, _)) => &text[..byte],
            None => text,
        }
    }

    fn request(&self, task: Task, text: &str) -> CompletionRequest {
        let (instruction, budget) = match task {
            Task::Summary => (SUMMARY_INSTRUCTION, self.limits.summary_tokens),
            Task::Keyword => (KEYWORD_INSTRUCTION, self.limits.keyword_tokens),
        };
        CompletionRequest::new(task, instruction, self.clip(text), budget)
    }

    async fn run(&self, task: Task, text: &str) -> Result<String> {
        let completion = self
            .provider
            .complete(&self.request(task, text))
            .await
            .with_context(|| format!("{} failed to produce a {}", self.provider.model_name(), task))?;
        if completion.truncated {
            tracing::warn!("{} {} hit its token budget", completion.model, task);
        }
        Ok(completion.text)
    }
}

#[async_trait]
impl Distiller for LlmDistiller {
    async fn summarize(&self, text: &str) -> Result<String> {
        Ok(self.run(Task::Summary, text).await?.trim().to_string())
    }

    async fn extract_keyword(&self, text: &str) -> Result<String> {
        Ok(clean_keyword(&self.run(Task::Keyword, text).await?))
    }
}

/// Strip quotes, trailing punctuation and extra lines from a model keyword.
fn clean_keyword(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '.' | ',' | ';' | ':'))
        .trim()
        .to_string()
}

/// Offline distiller: keeps the paragraph (clipped) as its own summary and
/// the first few words as its keyword.
#[derive(Debug, Clone)]
pub struct PassthroughDistiller {
    pub max_chars: usize,
    pub keyword_words: usize,
}

impl Default for PassthroughDistiller {
    fn default() -> Self {
        Self {
            max_chars: 600,
            keyword_words: 4,
        }
    }
}

#[async_trait]
impl Distiller for PassthroughDistiller {
    async fn summarize(&self, text: &str) -> Result<String> {
        Ok(text.trim().chars().take(self.max_chars).collect())
    }

    async fn extract_keyword(&self, text: &str) -> Result<String> {
        Ok(text
            .split_whitespace()
            .take(self.keyword_words)
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Summarize every paragraph and pull its keyword from the raw paragraph.
pub async fn distill_fragments(
    distiller: &dyn Distiller,
    paragraphs: &[String],
) -> Result<Vec<Fragment>> {
    let mut fragments = Vec::with_capacity(paragraphs.len());
    for (i, paragraph) in paragraphs.iter().enumerate() {
        let summary = distiller
            .summarize(paragraph)
            .await
            .with_context(|| format!("Paragraph {}", i))?;
        let keyword = distiller
            .extract_keyword(paragraph)
            .await
            .with_context(|| format!("Paragraph {}", i))?;
        tracing::debug!("Paragraph {} -> keyword '{}'", i, keyword);
        fragments.push(Fragment::new(summary, keyword));
    }
    Ok(fragments)
}
