//! Vector store trait for storing and searching index entries.

use async_trait::async_trait;

use std::cmp::Ordering;

use crate::document::{IndexEntry, IndexManifest, SearchResult};
use crate::error::{RagError, Result};

/// A storage backend for index entries with similarity search.
///
/// Entries are keyed by `(document_id, chunk_index)`: upserting an entry with
/// an existing key replaces it in place and keeps its original insertion
/// position. Implementations must be safe to share between concurrent
/// readers.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert(&entries).await?;
/// let results = store.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The embedding model the stored vectors were produced with, if any
    /// entries were ever written.
    async fn manifest(&self) -> Result<Option<IndexManifest>>;

    /// Record the embedding model for this index.
    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()>;

    /// Insert or replace entries.
    ///
    /// Fails with [`RagError::InvalidConfiguration`](crate::RagError::InvalidConfiguration)
    /// if an embedding does not match the manifest dimension.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Make `entries` the complete set of entries for `document_id`.
    ///
    /// Entries of the document whose key is not in `entries` are removed,
    /// the rest are upserted. The swap is atomic: a concurrent search sees
    /// either the old chunks or the new ones.
    ///
    /// Fails with [`RagError::InvalidInput`] if an entry belongs to another
    /// document, and with [`RagError::InvalidConfiguration`] on a dimension
    /// mismatch.
    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Return at most `top_k` entries most similar to `embedding`.
    ///
    /// Results are ordered by descending cosine similarity; equal scores keep
    /// insertion order. An empty index yields an empty `Vec`.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;

    /// Number of distinct documents with at least one stored entry.
    async fn distinct_documents(&self) -> Result<usize>;

    /// Remove every entry and the manifest.
    async fn reset(&self) -> Result<()>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sort scored results by descending score and keep the best `top_k`.
///
/// The sort is stable, so callers that feed results in insertion order get
/// insertion-order tie breaking. NaN scores rank below every number.
pub(crate) fn rank(mut scored: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    scored.sort_by(|a, b| descending(a.score, b.score));
    scored.truncate(top_k);
    scored
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// Reject entries whose vectors do not have the manifest's width.
pub(crate) fn check_dimensions(manifest: Option<&IndexManifest>, entries: &[IndexEntry]) -> Result<()> {
    let Some(manifest) = manifest else {
        return Ok(());
    };
    match entries.iter().find(|e| e.embedding.len() != manifest.dimensions) {
        Some(bad) => Err(RagError::InvalidConfiguration(format!(
            "entry {} has {} dimensions, index expects {}",
            bad.chunk.id(),
            bad.embedding.len(),
            manifest.dimensions
        ))),
        None => Ok(()),
    }
}

/// Reject entries that do not belong to `document_id`.
pub(crate) fn check_owner(document_id: &str, entries: &[IndexEntry]) -> Result<()> {
    match entries.iter().find(|e| e.chunk.document_id != document_id) {
        Some(stray) => Err(RagError::InvalidInput(format!(
            "entry {} does not belong to document '{document_id}'",
            stray.chunk.id()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let s = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nan_scores_rank_last() {
        let hit = |id: &str, score: f32| SearchResult {
            entry: IndexEntry {
                chunk: crate::document::Chunk {
                    document_id: id.into(),
                    chunk_index: 0,
                    start: 0,
                    end: 0,
                    text: String::new(),
                    metadata: Default::default(),
                },
                embedding: vec![],
            },
            score,
        };
        let scored = (0..40)
            .map(|i| if i % 3 == 0 { hit("nan", f32::NAN) } else { hit("ok", i as f32 / 40.0) })
            .collect();
        let ranked = rank(scored, 40);
        assert_eq!(ranked.len(), 40);
        let first_nan = ranked.iter().position(|r| r.score.is_nan()).unwrap();
        assert!(ranked[..first_nan].windows(2).all(|w| w[0].score >= w[1].score));
        assert!(ranked[first_nan..].iter().all(|r| r.score.is_nan()));
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
