//! Retrieval-augmented question answering over biomedical literature.
//!
//! This crate provides:
//! - Document preparation and a pluggable document source boundary
//! - Fixed-size character chunking with overlap
//! - An embedding adapter guarding model identity and vector dimension
//! - Vector stores: in-memory, and SQLite behind the `sqlite` feature
//! - Batch ingestion with per-document failure reporting
//! - Query translation, retrieval, budgeted prompt assembly and cited
//!   answer generation
//!
//! Ollama and OpenAI-compatible backends are available behind the `ollama`
//! and `openai` features; [`mock`] holds deterministic stand-ins for tests.

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod inmemory;
pub mod llm;
pub mod mock;
pub mod pipeline;
pub mod preprocess;
pub mod prompt;
pub mod retriever;
pub mod source;
pub mod translate;
pub mod vectorstore;

mod timeout;

#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chunking::{Chunker, FixedSizeChunker};
pub use config::{Backend, MedragConfig, MedragConfigBuilder, TranslationFallback};
pub use document::{Chunk, Document, IndexEntry, IndexManifest, SearchResult};
pub use embedding::{EmbeddingAdapter, EmbeddingProvider};
pub use error::{RagError, Result};
pub use generator::{Answer, Citation, Generator, NO_EVIDENCE_ANSWER};
pub use ingest::{IngestFailure, IngestReport, IngestionPipeline, IngestionPipelineBuilder};
pub use inmemory::InMemoryVectorStore;
pub use llm::{GenerationOptions, TextGenerator};
pub use pipeline::{IndexStatus, MedicalRag, MedicalRagBuilder, RagResponse};
pub use prompt::{GenerationRequest, PromptAssembler, PromptTemplate};
pub use retriever::{RetrievalResult, Retriever};
pub use source::{Article, DocumentSource, InMemorySource, JsonFileSource, RetryingSource};
pub use translate::QueryTranslator;
pub use vectorstore::{VectorStore, cosine_similarity};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaEmbeddingProvider, OllamaGenerator};
#[cfg(feature = "openai")]
pub use openai::{OpenAIEmbeddingProvider, OpenAIGenerator};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVectorStore;
