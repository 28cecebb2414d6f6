//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and small corpora; nothing survives the process.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{IndexEntry, IndexManifest, SearchResult};
use crate::error::Result;
use crate::vectorstore::{VectorStore, check_dimensions, check_owner, cosine_similarity, rank};

#[derive(Debug, Default)]
struct Inner {
    manifest: Option<IndexManifest>,
    /// (document_id, chunk_index) → (insertion sequence, entry)
    entries: HashMap<(String, usize), (u64, IndexEntry)>,
    next_seq: u64,
}

impl Inner {
    /// Insert or replace, keeping the sequence number of replaced keys.
    fn insert_all(&mut self, entries: &[IndexEntry]) {
        for entry in entries {
            let key = entry.chunk.key();
            let seq = match self.entries.get(&key) {
                Some((seq, _)) => *seq,
                None => {
                    self.next_seq += 1;
                    self.next_seq
                }
            };
            self.entries.insert(key, (seq, entry.clone()));
        }
    }
}

/// An in-memory vector store using cosine similarity for search.
///
/// Readers share the lock, so concurrent queries never block each other;
/// a writer sees and produces whole batches only.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn manifest(&self) -> Result<Option<IndexManifest>> {
        Ok(self.inner.read().await.manifest.clone())
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        self.inner.write().await.manifest = Some(manifest.clone());
        Ok(())
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut inner = self.inner.write().await;
        check_dimensions(inner.manifest.as_ref(), entries)?;
        inner.insert_all(entries);
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_owner(document_id, entries)?;
        let mut inner = self.inner.write().await;
        check_dimensions(inner.manifest.as_ref(), entries)?;
        let keep: HashSet<usize> = entries.iter().map(|e| e.chunk.chunk_index).collect();
        inner.entries.retain(|(doc, index), _| doc != document_id || keep.contains(index));
        inner.insert_all(entries);
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read().await;

        let mut ordered: Vec<&(u64, IndexEntry)> = inner.entries.values().collect();
        ordered.sort_by_key(|(seq, _)| *seq);

        let scored: Vec<SearchResult> = ordered
            .into_iter()
            .map(|(_, entry)| SearchResult {
                score: cosine_similarity(&entry.embedding, embedding),
                entry: entry.clone(),
            })
            .collect();

        Ok(rank(scored, top_k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.entries.len())
    }

    async fn distinct_documents(&self) -> Result<usize> {
        let inner = self.inner.read().await;
        let documents: HashSet<&str> = inner.entries.keys().map(|(doc, _)| doc.as_str()).collect();
        Ok(documents.len())
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
        Ok(())
    }
}
