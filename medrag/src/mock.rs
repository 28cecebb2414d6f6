//! Deterministic stand-ins for the embedding and LLM services.
//!
//! Useful for tests, demos and offline runs: nothing here touches the
//! network, and identical input always produces identical output.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::llm::{GenerationOptions, TextGenerator};

pub use crate::source::InMemorySource;

/// A lexical embedding: lowercase word tokens hashed into `dimensions`
/// buckets, L2-normalised.
///
/// Texts sharing vocabulary get high cosine similarity, which is enough to
/// exercise retrieval end to end without a model.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, model_id: format!("hashing-bow-{dimensions}") }
    }

    /// Report a different model identifier (for manifest mismatch tests).
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a: stable across runs and platforms.
        let hash = token
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3));
        (hash % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut emb = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            emb[self.bucket(token)] += 1.0;
        }
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            emb.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(emb)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// A scripted [`TextGenerator`] that records every prompt it receives.
pub struct MockTextGenerator {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
}

impl MockTextGenerator {
    /// Answer every prompt with `f(prompt)`.
    pub fn from_fn(f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self { responder: Box::new(f), prompts: Mutex::new(Vec::new()) }
    }

    /// Answer every prompt with the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_| Ok(text.clone()))
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_text(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).push(prompt.to_string());
        (self.responder)(prompt)
    }
}
