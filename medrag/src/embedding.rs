//! Embedding providers and the adapter that guards them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::document::IndexManifest;
use crate::error::{RagError, Result};
use crate::timeout::bounded;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Ollama, OpenAI, etc.)
/// behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the model behind this provider, recorded in the index.
    fn model_id(&self) -> &str;
}

/// The single embedding entry point used by ingestion and retrieval.
///
/// Wraps an [`EmbeddingProvider`] with input validation, a per-call timeout
/// and output dimension checks. Sharing one adapter between ingestion and
/// query time keeps both sides on the same model; the index manifest check
/// catches the case where they were built apart.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// The manifest an index built by this adapter should carry.
    pub fn manifest(&self) -> IndexManifest {
        IndexManifest {
            embedding_model: self.model_id().to_string(),
            dimensions: self.dimensions(),
        }
    }

    /// Verify that an index manifest matches this adapter.
    ///
    /// # Errors
    ///
    /// - [`RagError::ModelMismatch`] if the index was built with another model
    /// - [`RagError::InvalidConfiguration`] if the dimensions disagree
    pub fn check_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        if manifest.embedding_model != self.model_id() {
            return Err(RagError::ModelMismatch {
                indexed: manifest.embedding_model.clone(),
                active: self.model_id().to_string(),
            });
        }
        if manifest.dimensions != self.dimensions() {
            return Err(RagError::InvalidConfiguration(format!(
                "index holds {}-dimensional vectors but '{}' produces {}",
                manifest.dimensions,
                self.model_id(),
                self.dimensions()
            )));
        }
        Ok(())
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] for empty or whitespace-only text
    /// - [`RagError::Timeout`] if the provider does not answer in time
    /// - [`RagError::InvalidConfiguration`] if the vector has the wrong dimension
    /// - [`RagError::EmbeddingError`] if the vector holds NaN or infinity
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        reject_blank(text)?;
        let vector = bounded("embedding", self.timeout, self.provider.embed(text)).await?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    /// Embed a batch of texts, returning one vector per input in order.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            reject_blank(text)?;
        }
        debug!(model = self.model_id(), batch_size = texts.len(), "embedding batch");
        let vectors = bounded("embedding", self.timeout, self.provider.embed_batch(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingError {
                provider: self.model_id().to_string(),
                message: format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            });
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions() {
            return Err(RagError::InvalidConfiguration(format!(
                "model '{}' returned a {}-dimensional vector, expected {}",
                self.model_id(),
                vector.len(),
                self.dimensions()
            )));
        }
        if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
            return Err(RagError::EmbeddingError {
                provider: self.model_id().to_string(),
                message: format!("non-finite value {} at position {position}", vector[position]),
            });
        }
        Ok(())
    }
}

fn reject_blank(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::InvalidInput("cannot embed empty text".to_string()));
    }
    Ok(())
}
