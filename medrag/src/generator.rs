//! Answer generation with citations.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::document::{SearchResult, keys};
use crate::error::{RagError, Result};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::prompt::GenerationRequest;
use crate::timeout::bounded;

/// The answer given when retrieval found nothing to ground an answer on.
pub const NO_EVIDENCE_ANSWER: &str = "No supporting evidence was found in the indexed literature \
for this question, so no answer can be given. Try rephrasing the question or using different keywords.";

/// A source passage that was presented to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Citation {
    pub document_id: String,
    pub title: String,
    pub venue: String,
    pub published: String,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub chunk_index: usize,
    pub score: f32,
}

impl From<&SearchResult> for Citation {
    fn from(hit: &SearchResult) -> Self {
        let chunk = &hit.entry.chunk;
        let meta = |key: &str| chunk.metadata.get(key).cloned().unwrap_or_default();
        Self {
            document_id: chunk.document_id.clone(),
            title: meta(keys::TITLE),
            venue: meta(keys::VENUE),
            published: meta(keys::PUBLISHED),
            authors: chunk.metadata_list(keys::AUTHORS),
            doi: chunk.metadata.get(keys::DOI).cloned().filter(|d| !d.is_empty()),
            chunk_index: chunk.chunk_index,
            score: hit.score,
        }
    }
}

/// Generated text plus the passages it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// One entry per passage in the prompt, best first.
    pub citations: Vec<Citation>,
    /// Set when there was no evidence and the model was not consulted.
    pub no_evidence: bool,
}

/// Calls the LLM on an assembled prompt.
#[derive(Clone)]
pub struct Generator {
    llm: Arc<dyn TextGenerator>,
    timeout: Duration,
    retry_delay: Duration,
}

impl Generator {
    pub fn new(llm: Arc<dyn TextGenerator>, timeout: Duration, retry_delay: Duration) -> Self {
        Self { llm, timeout, retry_delay }
    }

    /// Generate the answer for `request`.
    ///
    /// A request without sources is answered with [`NO_EVIDENCE_ANSWER`]
    /// and no model call. Otherwise the model is called once, and once more
    /// after the retry delay if the first call failed transiently.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationUnavailable`] if the model fails or
    /// produces no text. No partial answer is returned.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Answer> {
        if request.sources.is_empty() {
            info!("no evidence retrieved, answering without the model");
            return Ok(Answer {
                text: NO_EVIDENCE_ANSWER.to_string(),
                citations: Vec::new(),
                no_evidence: true,
            });
        }

        let text = match self.call(&request.prompt).await {
            Err(e) if e.is_transient() => {
                warn!(llm = self.llm.name(), error = %e, delay_ms = self.retry_delay.as_millis() as u64, "generation failed, retrying once");
                tokio::time::sleep(self.retry_delay).await;
                self.call(&request.prompt).await
            }
            other => other,
        }
        .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::GenerationUnavailable("model returned an empty answer".to_string()));
        }

        let citations: Vec<Citation> = request.sources.iter().map(Citation::from).collect();
        info!(llm = self.llm.name(), answer_chars = text.chars().count(), citations = citations.len(), "answer generated");
        Ok(Answer { text: text.to_string(), citations, no_evidence: false })
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        bounded("generation", self.timeout, self.llm.generate_text(prompt, &GenerationOptions::ANSWER)).await
    }
}
