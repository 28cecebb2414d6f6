//! The question-answering orchestrator.
//!
//! [`MedicalRag`] wires the components together. One question runs as a
//! straight sequence: translate, embed, search, assemble, generate.
//! Every component is immutable after construction, so a single instance
//! (or clones of its `Arc`s) can serve concurrent questions.
//!
//! # Example
//!
//! ```rust,ignore
//! use medrag::{InMemoryVectorStore, MedicalRag, MedragConfig};
//!
//! let rag = MedicalRag::builder()
//!     .config(MedragConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .llm(Arc::new(llm))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .build()?;
//!
//! rag.ingestion().ingest_documents(&documents).await?;
//! let response = rag.ask("What is the first-line treatment for hypertension?").await?;
//! println!("{}", response.answer);
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument};

use crate::config::MedragConfig;
use crate::document::IndexManifest;
use crate::embedding::{EmbeddingAdapter, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generator::{Citation, Generator};
use crate::ingest::IngestionPipeline;
use crate::llm::TextGenerator;
use crate::prompt::{PromptAssembler, PromptTemplate};
use crate::retriever::{RetrievalResult, Retriever};
use crate::source::DocumentSource;
use crate::translate::QueryTranslator;
use crate::vectorstore::VectorStore;

/// Everything the caller needs to display one answer.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    /// The question as asked.
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// The query the index was searched with.
    pub search_query: String,
    /// The untranslated question was searched with because translation failed.
    pub degraded: bool,
    /// Nothing relevant was retrieved and the model was not consulted.
    pub no_evidence: bool,
    /// Passages retrieved but left out of the prompt to respect the budget.
    pub dropped_passages: usize,
    pub translation_ms: u64,
    /// Embedding and index search, excluding translation.
    pub search_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
}

/// A summary of what the index holds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexStatus {
    pub entries: usize,
    pub documents: usize,
    /// `None` until the first ingestion.
    pub manifest: Option<IndexManifest>,
}

/// Retrieval-augmented question answering over an indexed literature corpus.
///
/// Construct one via [`MedicalRag::builder()`].
pub struct MedicalRag {
    config: Arc<MedragConfig>,
    store: Arc<dyn VectorStore>,
    ingestion: IngestionPipeline,
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Generator,
}

impl MedicalRag {
    pub fn builder() -> MedicalRagBuilder {
        MedicalRagBuilder::default()
    }

    pub fn config(&self) -> &MedragConfig {
        &self.config
    }

    /// The ingestion side, sharing this instance's embedding model and index.
    pub fn ingestion(&self) -> &IngestionPipeline {
        &self.ingestion
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `question` using the configured number of passages.
    pub async fn ask(&self, question: &str) -> Result<RagResponse> {
        self.ask_with_top_k(question, self.config.top_k).await
    }

    /// Answer `question` using at most `top_k` passages.
    pub async fn ask_with_top_k(&self, question: &str, top_k: usize) -> Result<RagResponse> {
        self.ask_with(question, top_k, None).await
    }

    /// Answer `question` using at most `top_k` passages, optionally with a
    /// similarity threshold other than the configured one.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] for an empty question, `top_k == 0` or a
    ///   threshold outside `[-1, 1]`
    /// - [`RagError::ModelMismatch`] if the index was built with another model
    /// - [`RagError::InvalidConfiguration`] if the index holds vectors of
    ///   another dimension
    /// - [`RagError::TranslationUnavailable`] under the abort policy
    /// - [`RagError::GenerationUnavailable`] if no answer could be generated
    #[instrument(skip(self))]
    pub async fn ask_with(
        &self,
        question: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<RagResponse> {
        if top_k == 0 {
            return Err(RagError::InvalidInput("top_k must be greater than zero".to_string()));
        }
        let started = Instant::now();

        let retrieval = self.retriever.retrieve_with(question, top_k, threshold).await?;
        let translation_ms = retrieval.translation_ms;
        let search_ms = elapsed_ms(started).saturating_sub(translation_ms);

        let request = self.assembler.assemble(&retrieval.question, &retrieval)?;
        let generation_started = Instant::now();
        let answer = self.generator.generate(&request).await?;
        let generation_ms = if answer.no_evidence { 0 } else { elapsed_ms(generation_started) };

        let total_ms = elapsed_ms(started);
        info!(
            citations = answer.citations.len(),
            degraded = retrieval.degraded,
            no_evidence = answer.no_evidence,
            translation_ms,
            search_ms,
            generation_ms,
            total_ms,
            "question answered"
        );

        let RetrievalResult { question, search_query, degraded, .. } = retrieval;
        Ok(RagResponse {
            question,
            answer: answer.text,
            citations: answer.citations,
            search_query,
            degraded,
            no_evidence: answer.no_evidence,
            dropped_passages: request.dropped,
            translation_ms,
            search_ms,
            generation_ms,
            total_ms,
        })
    }

    /// Entry and document counts plus the recorded embedding model.
    pub async fn status(&self) -> Result<IndexStatus> {
        Ok(IndexStatus {
            entries: self.store.count().await?,
            documents: self.store.distinct_documents().await?,
            manifest: self.store.manifest().await?,
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`MedicalRag`].
///
/// `config`, `embedding_provider`, `llm` and `vector_store` are required.
/// The document source is only needed for ingestion by identifier, and the
/// prompt template defaults to [`PromptTemplate::default()`].
#[derive(Default)]
pub struct MedicalRagBuilder {
    config: Option<MedragConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn TextGenerator>>,
    store: Option<Arc<dyn VectorStore>>,
    source: Option<Arc<dyn DocumentSource>>,
    template: Option<PromptTemplate>,
}

impl MedicalRagBuilder {
    pub fn config(mut self, config: MedragConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the language model used for both translation and generation.
    pub fn llm(mut self, llm: Arc<dyn TextGenerator>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required component is
    /// missing or the configuration does not validate.
    pub fn build(self) -> Result<MedicalRag> {
        let config = self
            .config
            .ok_or_else(|| RagError::InvalidConfiguration("config is required".to_string()))?;
        config.validate()?;
        let provider = self.embedding_provider.ok_or_else(|| {
            RagError::InvalidConfiguration("embedding_provider is required".to_string())
        })?;
        let llm = self
            .llm
            .ok_or_else(|| RagError::InvalidConfiguration("llm is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| RagError::InvalidConfiguration("vector_store is required".to_string()))?;

        let embedding = EmbeddingAdapter::new(provider, config.embedding_timeout());

        let mut ingestion = IngestionPipeline::builder()
            .config(config.clone())
            .embedding(embedding.clone())
            .vector_store(store.clone());
        if let Some(source) = self.source {
            ingestion = ingestion.source(source);
        }
        let ingestion = ingestion.build()?;

        let translator = QueryTranslator::new(llm.clone(), config.translation_timeout());
        let generator =
            Generator::new(llm, config.generation_timeout(), config.generation_retry_delay());
        let assembler = PromptAssembler::new(
            self.template.unwrap_or_default(),
            config.prompt_budget,
            config.user_language.clone(),
        );

        let config = Arc::new(config);
        let retriever = Retriever::new(config.clone(), translator, embedding, store.clone());

        Ok(MedicalRag { config, store, ingestion, retriever, assembler, generator })
    }
}
