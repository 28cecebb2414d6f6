//! Batch ingestion: fetch → chunk → embed → upsert.
//!
//! Failures are accounted per document. A document that cannot be fetched,
//! has no text or fails to embed is recorded in the [`IngestReport`] and the
//! batch moves on. Only fatal errors (a model mismatch, corruption or broken
//! configuration) stop the run, since every later document would fail the
//! same way.
//!
//! Re-ingesting a document replaces all of its entries, so a document that
//! now produces fewer chunks leaves none of its old ones behind.
//!
//! # Example
//!
//! ```rust,ignore
//! use medrag::{IngestionPipeline, MedragConfig};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(MedragConfig::default())
//!     .embedding(adapter)
//!     .vector_store(store)
//!     .source(Arc::new(source))
//!     .build()?;
//!
//! let report = pipeline.ingest_batch(&ids).await?;
//! println!("{} processed, {} failed", report.processed, report.failed.len());
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, FixedSizeChunker};
use crate::config::MedragConfig;
use crate::document::{Document, IndexEntry};
use crate::embedding::EmbeddingAdapter;
use crate::error::{RagError, Result};
use crate::source::DocumentSource;
use crate::vectorstore::VectorStore;

/// A document that could not be ingested.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IngestReport {
    /// Documents whose chunks were all written.
    pub processed: usize,
    pub failed: Vec<IngestFailure>,
    /// Index entries written (new or overwritten).
    pub chunks_written: usize,
    /// Whitespace-only chunks that were not embedded.
    pub skipped_chunks: usize,
}

impl IngestReport {
    fn record_failure(&mut self, id: &str, err: &RagError) {
        warn!(document.id = %id, error = %err, "document not ingested");
        self.failed.push(IngestFailure { id: id.to_string(), reason: err.to_string() });
    }
}

/// Writes documents into a [`VectorStore`].
///
/// Construct one via [`IngestionPipeline::builder()`]. Re-running a batch is
/// safe: each document's entries are replaced as a whole.
pub struct IngestionPipeline {
    chunker: Arc<dyn Chunker>,
    embedding: EmbeddingAdapter,
    store: Arc<dyn VectorStore>,
    source: Option<Arc<dyn DocumentSource>>,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Record this pipeline's embedding model in an empty index, or check it
    /// against the model already recorded there.
    pub async fn ensure_manifest(&self) -> Result<()> {
        match self.store.manifest().await? {
            Some(manifest) => self.embedding.check_manifest(&manifest),
            None => {
                let manifest = self.embedding.manifest();
                info!(model = %manifest.embedding_model, dimensions = manifest.dimensions, "initialising index manifest");
                self.store.write_manifest(&manifest).await
            }
        }
    }

    /// Fetch and ingest the documents with the given identifiers.
    ///
    /// # Errors
    ///
    /// Per-document problems end up in the report. The call itself fails
    /// only on fatal errors, or with [`RagError::InvalidConfiguration`] if
    /// no document source was configured.
    pub async fn ingest_batch(&self, ids: &[String]) -> Result<IngestReport> {
        let source = self.source.as_ref().ok_or_else(|| {
            RagError::InvalidConfiguration("ingesting by identifier requires a document source".to_string())
        })?;
        self.ensure_manifest().await?;

        let mut report = IngestReport::default();
        for id in ids {
            match source.fetch(id).await {
                Ok(document) => self.ingest_into(&document, &mut report).await?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.record_failure(id, &e),
            }
        }
        log_report(&report);
        Ok(report)
    }

    /// Ingest every identifier the configured source lists.
    pub async fn ingest_all(&self) -> Result<IngestReport> {
        let source = self.source.as_ref().ok_or_else(|| {
            RagError::InvalidConfiguration("ingesting by identifier requires a document source".to_string())
        })?;
        let ids = source.list_ids().await?;
        self.ingest_batch(&ids).await
    }

    /// Ingest documents that were already fetched.
    pub async fn ingest_documents(&self, documents: &[Document]) -> Result<IngestReport> {
        self.ensure_manifest().await?;
        let mut report = IngestReport::default();
        for document in documents {
            self.ingest_into(document, &mut report).await?;
        }
        log_report(&report);
        Ok(report)
    }

    /// Remove every entry and the manifest.
    pub async fn reset(&self) -> Result<()> {
        warn!("resetting index");
        self.store.reset().await
    }

    async fn ingest_into(&self, document: &Document, report: &mut IngestReport) -> Result<()> {
        match self.ingest_document(document).await {
            Ok((written, skipped)) => {
                report.processed += 1;
                report.chunks_written += written;
                report.skipped_chunks += skipped;
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(document.id = %document.id, error = %e, "fatal error during ingestion");
                Err(e)
            }
            Err(e) => {
                report.record_failure(&document.id, &e);
                Ok(())
            }
        }
    }

    /// Chunk, embed and upsert one document. Returns (written, skipped).
    async fn ingest_document(&self, document: &Document) -> Result<(usize, usize)> {
        if document.text.trim().is_empty() {
            return Err(RagError::InvalidInput(format!("document '{}' has no text", document.id)));
        }

        let chunks = self.chunker.chunk(document);
        let total = chunks.len();
        let pending: Vec<_> = chunks.into_iter().filter(|c| !c.text.trim().is_empty()).collect();
        let skipped = total - pending.len();

        let mut entries = Vec::with_capacity(pending.len());
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedding.embed_batch(&texts).await?;
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| IndexEntry { chunk, embedding }),
            );
            debug!(document.id = %document.id, embedded = entries.len(), total = pending.len(), "embedded batch");
        }

        self.store.replace_document(&document.id, &entries).await?;
        info!(document.id = %document.id, chunk_count = entries.len(), skipped, "ingested document");
        Ok((entries.len(), skipped))
    }
}

fn log_report(report: &IngestReport) {
    info!(
        processed = report.processed,
        failed = report.failed.len(),
        chunks_written = report.chunks_written,
        skipped_chunks = report.skipped_chunks,
        "ingestion finished"
    );
}

/// Builder for an [`IngestionPipeline`].
///
/// `config`, `embedding` and `vector_store` are required. The chunker
/// defaults to a [`FixedSizeChunker`] using the configured size and overlap.
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<MedragConfig>,
    embedding: Option<EmbeddingAdapter>,
    store: Option<Arc<dyn VectorStore>>,
    source: Option<Arc<dyn DocumentSource>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl IngestionPipelineBuilder {
    pub fn config(mut self, config: MedragConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding(mut self, embedding: EmbeddingAdapter) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the source used by [`IngestionPipeline::ingest_batch`].
    pub fn source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the chunking strategy.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required field is
    /// missing or the configuration does not validate.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config = self
            .config
            .ok_or_else(|| RagError::InvalidConfiguration("config is required".to_string()))?;
        config.validate()?;
        let embedding = self
            .embedding
            .ok_or_else(|| RagError::InvalidConfiguration("embedding is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| RagError::InvalidConfiguration("vector_store is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?),
        };

        Ok(IngestionPipeline {
            chunker,
            embedding,
            store,
            source: self.source,
            batch_size: config.embedding_batch_size,
        })
    }
}
