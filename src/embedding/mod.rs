//! Embedding Module
//!
//! Provides text embedding generation using FastEmbed (ONNX-based, local inference).
//! The round driver only sees the [`Embedder`] trait, so tests and other
//! backends can stand in for the local model.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default embedding model
const DEFAULT_MODEL: EmbeddingModel = EmbeddingModel::AllMiniLML6V2;

/// Embedding dimension for AllMiniLML6V2
pub const EMBEDDING_DIMENSION: usize = 384;

const CACHE_SIZE: usize = 1000;

/// Text-to-vector backend used by the round driver.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Width of every returned vector. The round driver rejects batches
    /// that disagree with it.
    fn dimension(&self) -> usize;
}

/// Embedding engine for generating text embeddings
pub struct EmbeddingEngine {
    model: Arc<RwLock<TextEmbedding>>,
    cache: Arc<RwLock<LruCache<String, Vec<f32>>>>,
    model_name: String,
    dimension: usize,
}

impl EmbeddingEngine {
    /// Create a new embedding engine with default model
    pub async fn new() -> Result<Self> {
        Self::with_model(DEFAULT_MODEL).await
    }

    pub async fn with_model(embedding_model: EmbeddingModel) -> Result<Self> {
        let model_name = format!("{:?}", embedding_model);
        let init_options = InitOptions::new(embedding_model);

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            let model = TextEmbedding::try_new(init_options)
                .context("Failed to initialize embedding model")?;
            let dimension = model
                .embed(vec!["dimension probe"], None)
                .context("Failed to run the embedding model")?
                .first()
                .map_or(0, |v| v.len());
            Ok((model, dimension))
        })
        .await
        .context("Failed to spawn blocking task")??;

        let cache_size = NonZeroUsize::new(CACHE_SIZE).context("Cache size must be non-zero")?;

        tracing::info!("Loaded embedding model {} ({} dimensions)", model_name, dimension);
        Ok(Self {
            model: Arc::new(RwLock::new(model)),
            cache: Arc::new(RwLock::new(LruCache::new(cache_size))),
            model_name,
            dimension,
        })
    }

    /// Embed texts, serving repeats from the cache. Representatives carried
    /// between rounds keep their text, so most of them hit the cache.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        let mut to_embed = Vec::new();
        let mut to_embed_indices = Vec::new();

        {
            let mut cache = self.cache.write().await;
            for (i, text) in texts.iter().enumerate() {
                if let Some(cached) = cache.get(text) {
                    results.push(cached.clone());
                } else {
                    to_embed.push(text.clone());
                    to_embed_indices.push(i);
                    results.push(Vec::new()); // Placeholder
                }
            }
        }

        if !to_embed.is_empty() {
            tracing::debug!(
                "Embedding {} texts ({} cached)",
                to_embed.len(),
                texts.len() - to_embed.len()
            );
            let model = self.model.clone();
            let to_embed_copy = to_embed.clone();

            let embeddings = tokio::task::spawn_blocking(move || {
                let model_guard = futures::executor::block_on(model.read());
                model_guard.embed(to_embed_copy, None)
            })
            .await
            .context("Failed to spawn blocking task")?
            .context("Failed to generate embeddings")?;

            if embeddings.len() != to_embed.len() {
                anyhow::bail!(
                    "Model returned {} embeddings for {} texts",
                    embeddings.len(),
                    to_embed.len()
                );
            }

            let mut cache = self.cache.write().await;
            for ((text, idx), embedding) in to_embed.into_iter().zip(to_embed_indices).zip(embeddings) {
                cache.put(text, embedding.clone());
                results[idx] = embedding;
            }
        }

        Ok(results)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Clear the cache
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    /// (entries, capacity)
    pub async fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.read().await;
        (cache.len(), cache.cap().get())
    }
}

#[async_trait]
impl Embedder for EmbeddingEngine {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_texts(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raptor::clustering::cosine_similarity;

    #[tokio::test]
    #[ignore] // Downloads the ONNX model
    async fn test_batch_embedding() {
        let engine = EmbeddingEngine::new().await.unwrap();
        let texts = vec![
            "First sentence".to_string(),
            "Second sentence".to_string(),
            "Third sentence".to_string(),
        ];

        let embeddings = engine.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 3);
        assert_eq!(engine.dimension(), EMBEDDING_DIMENSION);
        for emb in embeddings {
            assert_eq!(emb.len(), EMBEDDING_DIMENSION);
        }
    }

    #[tokio::test]
    #[ignore] // Downloads the ONNX model
    async fn test_similarity_ordering() {
        let engine = EmbeddingEngine::new().await.unwrap();
        let texts = vec![
            "The quick brown fox".to_string(),
            "The fast brown fox".to_string(),
            "Completely different text".to_string(),
        ];
        let emb = engine.embed_batch(&texts).await.unwrap();

        assert!(cosine_similarity(&emb[0], &emb[1]) > cosine_similarity(&emb[0], &emb[2]));
    }

    #[tokio::test]
    #[ignore] // Downloads the ONNX model
    async fn test_cache() {
        let engine = EmbeddingEngine::new().await.unwrap();
        let texts = vec!["Cached text".to_string(), "Cached text".to_string()];

        let first = engine.embed_batch(&texts[..1]).await.unwrap();
        let second = engine.embed_batch(&texts).await.unwrap();

        assert_eq!(first[0], second[1]);
        let (used, capacity) = engine.cache_stats().await;
        assert_eq!(used, 1);
        assert_eq!(capacity, CACHE_SIZE);

        engine.clear_cache().await;
        assert_eq!(engine.cache_stats().await.0, 0);
    }
}
