//! Question → translated query → embedding → ranked passages.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{MedragConfig, TranslationFallback};
use crate::document::SearchResult;
use crate::embedding::EmbeddingAdapter;
use crate::error::{RagError, Result};
use crate::translate::QueryTranslator;
use crate::vectorstore::VectorStore;

/// Passages retrieved for one question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// The question as asked.
    pub question: String,
    /// The text that was embedded and searched with.
    pub search_query: String,
    /// Set when translation failed and the untranslated question was used.
    pub degraded: bool,
    /// At most `k` hits, by descending similarity.
    pub hits: Vec<SearchResult>,
    /// Time spent translating the question; zero when it was not translated.
    pub translation_ms: u64,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Runs the retrieval half of a query against a shared, read-only index.
#[derive(Clone)]
pub struct Retriever {
    config: Arc<MedragConfig>,
    translator: QueryTranslator,
    embedding: EmbeddingAdapter,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(
        config: Arc<MedragConfig>,
        translator: QueryTranslator,
        embedding: EmbeddingAdapter,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self { config, translator, embedding, store }
    }

    /// Retrieve up to `k` passages relevant to `question`.
    ///
    /// An index without entries yields an empty result. A populated index
    /// built with another embedding model fails with
    /// [`RagError::ModelMismatch`].
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        self.retrieve_with(question, k, None).await
    }

    /// [`retrieve`](Self::retrieve) with the configured similarity threshold
    /// replaced by `threshold` for this call.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidInput`] if `threshold` lies outside `[-1, 1]`.
    pub async fn retrieve_with(
        &self,
        question: &str,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".to_string()));
        }
        let threshold = match threshold {
            Some(t) if !(-1.0..=1.0).contains(&t) => {
                return Err(RagError::InvalidInput(format!(
                    "similarity threshold ({t}) must lie in [-1, 1]"
                )));
            }
            Some(t) => t,
            None => self.config.similarity_threshold,
        };

        let Some(manifest) = self.store.manifest().await? else {
            info!("index is empty, nothing to retrieve");
            return Ok(RetrievalResult {
                question: question.to_string(),
                search_query: question.to_string(),
                degraded: false,
                hits: Vec::new(),
                translation_ms: 0,
            });
        };
        self.embedding.check_manifest(&manifest)?;

        let (search_query, degraded, translation_ms) = self.search_query(question).await?;
        let vector = self.embedding.embed(&search_query).await?;

        let candidates = k.saturating_mul(self.config.candidate_factor);
        let mut hits = self.store.search(&vector, candidates).await?;
        let found = hits.len();
        hits.retain(|hit| hit.score >= threshold);
        hits.truncate(k);

        info!(found, kept = hits.len(), threshold, degraded, translation_ms, "retrieval completed");
        Ok(RetrievalResult {
            question: question.to_string(),
            search_query,
            degraded,
            hits,
            translation_ms,
        })
    }

    /// The text to search with, whether it is the degraded fallback, and
    /// how long translation took.
    async fn search_query(&self, question: &str) -> Result<(String, bool, u64)> {
        if self.config.skip_ascii_translation && question.is_ascii() {
            return Ok((question.to_string(), false, 0));
        }
        let started = Instant::now();
        let translated = self
            .translator
            .translate(question, &self.config.user_language, &self.config.corpus_language)
            .await;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match (translated, self.config.translation_fallback) {
            (Ok(text), _) => Ok((text, false, elapsed)),
            (Err(e), TranslationFallback::UseOriginal) => {
                warn!(error = %e, "translation unavailable, searching with the original question");
                Ok((question.to_string(), true, elapsed))
            }
            (Err(e), TranslationFallback::Abort) => Err(e),
        }
    }
}
