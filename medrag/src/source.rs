//! The document acquisition boundary.
//!
//! A [`DocumentSource`] turns document identifiers into [`Document`]s. The
//! network client that talks to a bibliographic service lives outside this
//! crate; what ships here is the on-disk article dump reader, an in-memory
//! source and a retry wrapper with bounded backoff for flaky sources.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document::Document;
use crate::error::{RagError, Result};
use crate::preprocess::{clean_text, expand_abbreviations, searchable_text};

/// Supplies documents by identifier.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch one document.
    ///
    /// Network trouble should be reported as
    /// [`RagError::ServiceUnreachable`] or [`RagError::Timeout`] so that
    /// [`RetryingSource`] can retry it.
    async fn fetch(&self, id: &str) -> Result<Document>;

    /// Every identifier this source can serve, in a stable order.
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// One record of a literature dump, as written by the bibliographic
/// collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Article {
    pub pmid: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub journal: String,
    pub publication_date: String,
    pub doi: Option<String>,
    pub keywords: Vec<String>,
    pub mesh_terms: Vec<String>,
    pub publication_types: Vec<String>,
}

impl Article {
    /// Convert into a [`Document`] whose text is the cleaned, labelled
    /// searchable text of the article.
    pub fn to_document(&self, expand: bool) -> Document {
        let cleaned = clean_text(&searchable_text(self));
        let text = if expand { expand_abbreviations(&cleaned) } else { cleaned };
        Document {
            id: self.pmid.clone(),
            title: clean_text(&self.title),
            venue: self.journal.clone(),
            published: self.publication_date.clone(),
            text,
            authors: self.authors.clone(),
            doi: self.doi.clone().filter(|d| !d.is_empty()),
            mesh_terms: self.mesh_terms.clone(),
            keywords: self.keywords.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ArticleDump {
    articles: Vec<Article>,
}

/// A fixed set of documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    order: Vec<String>,
    documents: HashMap<String, Document>,
}

impl InMemorySource {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let mut source = Self::default();
        for document in documents {
            if !source.documents.contains_key(&document.id) {
                source.order.push(document.id.clone());
            }
            source.documents.insert(document.id.clone(), document);
        }
        source
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn fetch(&self, id: &str) -> Result<Document> {
        self.documents.get(id).cloned().ok_or_else(|| RagError::DocumentFetch {
            id: id.to_string(),
            message: "no such document".to_string(),
        })
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.order.clone())
    }
}

/// Reads a JSON literature dump of the form `{ "articles": [ ... ] }`.
///
/// Articles without an identifier are skipped; a duplicated identifier
/// keeps the last record.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    inner: InMemorySource,
}

impl JsonFileSource {
    /// Load and convert every article in the file at `path`.
    ///
    /// `expand_abbreviations` controls clinical abbreviation expansion in the
    /// document text.
    pub async fn load(path: impl AsRef<Path>, expand_abbreviations: bool) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| RagError::DocumentFetch {
            id: path.display().to_string(),
            message: format!("cannot read article file: {e}"),
        })?;
        let source = Self::from_json(&raw, expand_abbreviations)?;
        info!(path = %path.display(), documents = source.inner.len(), "loaded article file");
        Ok(source)
    }

    /// Parse an article dump held in memory.
    pub fn from_json(raw: &str, expand_abbreviations: bool) -> Result<Self> {
        let dump: ArticleDump = serde_json::from_str(raw)
            .map_err(|e| RagError::InvalidInput(format!("malformed article file: {e}")))?;
        let documents = dump
            .articles
            .iter()
            .filter(|a| !a.pmid.trim().is_empty())
            .map(|a| a.to_document(expand_abbreviations));
        Ok(Self { inner: InMemorySource::new(documents) })
    }
}

#[async_trait]
impl DocumentSource for JsonFileSource {
    async fn fetch(&self, id: &str) -> Result<Document> {
        self.inner.fetch(id).await
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.inner.list_ids().await
    }
}

/// Retries transient failures of another source with exponential backoff.
///
/// Non-transient failures (unknown identifier, malformed record) are
/// returned at once.
pub struct RetryingSource<S> {
    inner: S,
    max_attempts: u32,
    base_delay: Duration,
}

impl<S: DocumentSource> RetryingSource<S> {
    /// Allow up to `max_attempts` tries per fetch, waiting `base_delay`,
    /// then twice that, and so on between tries.
    pub fn new(inner: S, max_attempts: u32, base_delay: Duration) -> Self {
        Self { inner, max_attempts: max_attempts.max(1), base_delay }
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "source call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: DocumentSource> DocumentSource for RetryingSource<S> {
    async fn fetch(&self, id: &str) -> Result<Document> {
        self.with_retry(id, || self.inner.fetch(id)).await
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.with_retry("list_ids", || self.inner.list_ids()).await
    }
}
