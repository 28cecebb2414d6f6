//! Text generation capability shared by translation and answer generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl GenerationOptions {
    /// Short, near-deterministic output for query translation.
    pub const TRANSLATION: Self = Self { temperature: 0.1, top_p: None, max_tokens: 50 };

    /// Settings for grounded answer generation.
    pub const ANSWER: Self = Self { temperature: 0.1, top_p: Some(0.9), max_tokens: 1000 };
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::ANSWER
    }
}

/// A language model that turns a prompt into text.
///
/// Translation and generation use the same implementation; they differ only
/// in the prompt they send. Implementations should report connection
/// failures as [`RagError::ServiceUnreachable`](crate::RagError::ServiceUnreachable)
/// so callers can tell transient failures from bad responses.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name of the backend and model, used in logs and errors.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}
