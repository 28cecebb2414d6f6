//! Configuration for the ingestion and question-answering pipelines.
//!
//! A [`MedragConfig`] is built once at startup (from defaults, environment
//! variables or a JSON file), validated, and then handed to every component.
//! Nothing reads process-wide settings after that point.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// What the retriever does when the question cannot be translated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranslationFallback {
    /// Fail the request with [`RagError::TranslationUnavailable`].
    #[default]
    Abort,
    /// Search with the untranslated question and flag the result as degraded.
    UseOriginal,
}

impl FromStr for TranslationFallback {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "use_original" | "original" => Ok(Self::UseOriginal),
            other => Err(RagError::InvalidConfiguration(format!(
                "unknown translation fallback '{other}' (expected 'abort' or 'use_original')"
            ))),
        }
    }
}

/// Which service implementation backs the embedding or LLM capability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// A local Ollama server.
    #[default]
    Ollama,
    /// An OpenAI-compatible remote API.
    #[serde(alias = "openai")]
    OpenAi,
}

impl FromStr for Backend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            other => Err(RagError::InvalidConfiguration(format!(
                "unknown backend '{other}' (expected 'ollama' or 'openai')"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => f.write_str("ollama"),
            Self::OpenAi => f.write_str("openai"),
        }
    }
}

/// Configuration parameters for the whole pipeline.
///
/// Chunk sizes and the prompt budget are measured in characters (Unicode
/// scalar values) for the entire corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MedragConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of passages handed to the generator.
    pub top_k: usize,
    /// Minimum similarity score for a passage to be kept.
    pub similarity_threshold: f32,
    /// Candidates fetched per requested passage before threshold filtering.
    pub candidate_factor: usize,
    /// Maximum prompt length in characters.
    pub prompt_budget: usize,
    /// Backend used to compute embeddings.
    pub embedding_backend: Backend,
    /// Base URL of the embedding service.
    pub embedding_base_url: String,
    /// Embedding model identifier, recorded in the index manifest.
    pub embedding_model: String,
    /// Dimension of the vectors the embedding model produces.
    pub embedding_dimensions: usize,
    /// Number of chunks sent per embedding request during ingestion.
    pub embedding_batch_size: usize,
    /// Backend used for translation and generation.
    pub llm_backend: Backend,
    /// Base URL of the LLM service.
    pub llm_base_url: String,
    /// Model used for translation and generation.
    pub llm_model: String,
    /// Location of the persistent index.
    pub index_path: PathBuf,
    pub embedding_timeout_secs: u64,
    pub translation_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    /// Pause before the single generation retry.
    pub generation_retry_delay_ms: u64,
    /// Policy applied when translation fails.
    pub translation_fallback: TranslationFallback,
    /// Treat pure-ASCII questions as already being in the corpus language.
    pub skip_ascii_translation: bool,
    /// Language questions are asked (and answered) in.
    pub user_language: String,
    /// Language of the indexed literature.
    pub corpus_language: String,
}

impl Default for MedragConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 50,
            top_k: 5,
            similarity_threshold: 0.3,
            candidate_factor: 2,
            prompt_budget: 12_000,
            embedding_backend: Backend::Ollama,
            embedding_base_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dimensions: 384,
            embedding_batch_size: 32,
            llm_backend: Backend::Ollama,
            llm_base_url: "http://localhost:11434".to_string(),
            llm_model: "llama3.1:8b-instruct-q4_0".to_string(),
            index_path: PathBuf::from("./medrag_index.db"),
            embedding_timeout_secs: 30,
            translation_timeout_secs: 15,
            generation_timeout_secs: 120,
            generation_retry_delay_ms: 500,
            translation_fallback: TranslationFallback::Abort,
            skip_ascii_translation: true,
            user_language: "Japanese".to_string(),
            corpus_language: "English".to_string(),
        }
    }
}

impl MedragConfig {
    /// Create a new builder for constructing a [`MedragConfig`].
    pub fn builder() -> MedragConfigBuilder {
        MedragConfigBuilder::default()
    }

    /// Build a configuration from `MEDRAG_*` environment variables layered
    /// over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup layered over the
    /// defaults. Unset keys keep their default value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut c = Self::default();
        override_from(&lookup, "MEDRAG_CHUNK_SIZE", &mut c.chunk_size)?;
        override_from(&lookup, "MEDRAG_CHUNK_OVERLAP", &mut c.chunk_overlap)?;
        override_from(&lookup, "MEDRAG_TOP_K", &mut c.top_k)?;
        override_from(&lookup, "MEDRAG_SIMILARITY_THRESHOLD", &mut c.similarity_threshold)?;
        override_from(&lookup, "MEDRAG_CANDIDATE_FACTOR", &mut c.candidate_factor)?;
        override_from(&lookup, "MEDRAG_PROMPT_BUDGET", &mut c.prompt_budget)?;
        override_from(&lookup, "MEDRAG_EMBEDDING_BACKEND", &mut c.embedding_backend)?;
        override_from(&lookup, "MEDRAG_EMBEDDING_BASE_URL", &mut c.embedding_base_url)?;
        override_from(&lookup, "MEDRAG_EMBEDDING_MODEL", &mut c.embedding_model)?;
        override_from(&lookup, "MEDRAG_EMBEDDING_DIMENSIONS", &mut c.embedding_dimensions)?;
        override_from(&lookup, "MEDRAG_EMBEDDING_BATCH_SIZE", &mut c.embedding_batch_size)?;
        override_from(&lookup, "MEDRAG_LLM_BACKEND", &mut c.llm_backend)?;
        override_from(&lookup, "MEDRAG_LLM_BASE_URL", &mut c.llm_base_url)?;
        override_from(&lookup, "MEDRAG_LLM_MODEL", &mut c.llm_model)?;
        override_from(&lookup, "MEDRAG_INDEX_PATH", &mut c.index_path)?;
        override_from(&lookup, "MEDRAG_EMBEDDING_TIMEOUT_SECS", &mut c.embedding_timeout_secs)?;
        override_from(&lookup, "MEDRAG_TRANSLATION_TIMEOUT_SECS", &mut c.translation_timeout_secs)?;
        override_from(&lookup, "MEDRAG_GENERATION_TIMEOUT_SECS", &mut c.generation_timeout_secs)?;
        override_from(&lookup, "MEDRAG_GENERATION_RETRY_DELAY_MS", &mut c.generation_retry_delay_ms)?;
        override_from(&lookup, "MEDRAG_TRANSLATION_FALLBACK", &mut c.translation_fallback)?;
        override_from(&lookup, "MEDRAG_SKIP_ASCII_TRANSLATION", &mut c.skip_ascii_translation)?;
        override_from(&lookup, "MEDRAG_USER_LANGUAGE", &mut c.user_language)?;
        override_from(&lookup, "MEDRAG_CORPUS_LANGUAGE", &mut c.corpus_language)?;
        c.validate()?;
        Ok(c)
    }

    /// Parse and validate a JSON configuration document. Missing fields keep
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            RagError::InvalidConfiguration(format!("malformed configuration file: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k`, `candidate_factor`, `prompt_budget`, `embedding_dimensions`
    ///   or `embedding_batch_size` is zero
    /// - `similarity_threshold` is outside `[-1, 1]`
    /// - a model name is empty or a timeout is zero
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RagError::InvalidConfiguration(msg));
        if self.chunk_size == 0 {
            return invalid("chunk_size must be greater than zero".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return invalid(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 {
            return invalid("top_k must be greater than zero".to_string());
        }
        if self.candidate_factor == 0 {
            return invalid("candidate_factor must be greater than zero".to_string());
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return invalid(format!(
                "similarity_threshold ({}) must lie in [-1, 1]",
                self.similarity_threshold
            ));
        }
        if self.prompt_budget == 0 {
            return invalid("prompt_budget must be greater than zero".to_string());
        }
        if self.embedding_dimensions == 0 {
            return invalid("embedding_dimensions must be greater than zero".to_string());
        }
        if self.embedding_batch_size == 0 {
            return invalid("embedding_batch_size must be greater than zero".to_string());
        }
        if self.embedding_model.trim().is_empty() || self.llm_model.trim().is_empty() {
            return invalid("model names must not be empty".to_string());
        }
        if self.embedding_timeout_secs == 0
            || self.translation_timeout_secs == 0
            || self.generation_timeout_secs == 0
        {
            return invalid("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_secs(self.translation_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn generation_retry_delay(&self) -> Duration {
        Duration::from_millis(self.generation_retry_delay_ms)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| {
            RagError::InvalidConfiguration(format!("{key}='{raw}' could not be parsed: {e}"))
        })?;
    }
    Ok(())
}

/// Builder for constructing a validated [`MedragConfig`].
#[derive(Debug, Clone, Default)]
pub struct MedragConfigBuilder {
    config: MedragConfig,
}

impl MedragConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of passages handed to the generator.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn candidate_factor(mut self, factor: usize) -> Self {
        self.config.candidate_factor = factor;
        self
    }

    /// Set the prompt length budget in characters.
    pub fn prompt_budget(mut self, budget: usize) -> Self {
        self.config.prompt_budget = budget;
        self
    }

    pub fn embedding_backend(mut self, backend: Backend) -> Self {
        self.config.embedding_backend = backend;
        self
    }

    pub fn embedding_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.embedding_base_url = url.into();
        self
    }

    /// Set the embedding model identifier and its output dimension.
    pub fn embedding_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.config.embedding_model = model.into();
        self.config.embedding_dimensions = dimensions;
        self
    }

    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    pub fn llm_backend(mut self, backend: Backend) -> Self {
        self.config.llm_backend = backend;
        self
    }

    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.llm_base_url = url.into();
        self
    }

    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm_model = model.into();
        self
    }

    /// Set the location of the persistent index.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = path.into();
        self
    }

    /// Set the embedding, translation and generation timeouts in seconds.
    pub fn timeouts(mut self, embedding: u64, translation: u64, generation: u64) -> Self {
        self.config.embedding_timeout_secs = embedding;
        self.config.translation_timeout_secs = translation;
        self.config.generation_timeout_secs = generation;
        self
    }

    pub fn generation_retry_delay_ms(mut self, delay: u64) -> Self {
        self.config.generation_retry_delay_ms = delay;
        self
    }

    pub fn translation_fallback(mut self, fallback: TranslationFallback) -> Self {
        self.config.translation_fallback = fallback;
        self
    }

    pub fn skip_ascii_translation(mut self, skip: bool) -> Self {
        self.config.skip_ascii_translation = skip;
        self
    }

    /// Set the user-facing and corpus languages.
    pub fn languages(mut self, user: impl Into<String>, corpus: impl Into<String>) -> Self {
        self.config.user_language = user.into();
        self.config.corpus_language = corpus.into();
        self
    }

    /// Build the [`MedragConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] as described on
    /// [`MedragConfig::validate`].
    pub fn build(self) -> Result<MedragConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
