//! Data types for documents, chunks, index entries and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata keys every index entry carries.
pub mod keys {
    pub const DOCUMENT_ID: &str = "document_id";
    pub const TITLE: &str = "title";
    pub const VENUE: &str = "venue";
    pub const PUBLISHED: &str = "published";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const AUTHORS: &str = "authors";
    pub const DOI: &str = "doi";
    pub const MESH_TERMS: &str = "mesh_terms";
    pub const KEYWORDS: &str = "keywords";
}

/// A piece of biomedical literature as delivered by a document source.
///
/// Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Document {
    /// External identifier, for example a PubMed ID.
    pub id: String,
    pub title: String,
    /// Journal or other publication venue.
    pub venue: String,
    /// Publication date as reported by the source.
    pub published: String,
    /// Text used for chunking and embedding.
    pub text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default)]
    pub mesh_terms: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Document {
    /// Metadata shared by every chunk of this document.
    ///
    /// List-valued fields are stored JSON-encoded.
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::from([
            (keys::DOCUMENT_ID.to_string(), self.id.clone()),
            (keys::TITLE.to_string(), self.title.clone()),
            (keys::VENUE.to_string(), self.venue.clone()),
            (keys::PUBLISHED.to_string(), self.published.clone()),
        ]);
        let lists = [
            (keys::AUTHORS, &self.authors),
            (keys::MESH_TERMS, &self.mesh_terms),
            (keys::KEYWORDS, &self.keywords),
        ];
        for (key, values) in lists {
            if !values.is_empty() {
                let encoded = serde_json::to_string(values).unwrap_or_default();
                metadata.insert(key.to_string(), encoded);
            }
        }
        if let Some(doi) = &self.doi {
            metadata.insert(keys::DOI.to_string(), doi.clone());
        }
        metadata
    }
}

/// A contiguous span of a [`Document`]'s text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Position of this chunk within the document, starting at zero.
    pub chunk_index: usize,
    /// Character offset of the first character of the chunk.
    pub start: usize,
    /// Character offset one past the last character of the chunk.
    pub end: usize,
    pub text: String,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Identifier of the form `{document_id}_{chunk_index}`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.document_id, self.chunk_index)
    }

    /// Composite key used for idempotent upserts.
    pub fn key(&self) -> (String, usize) {
        (self.document_id.clone(), self.chunk_index)
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get(keys::TITLE).map(String::as_str).filter(|t| !t.is_empty())
    }

    /// Decode a JSON-encoded list field from the metadata.
    pub fn metadata_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// A chunk paired with its embedding: the unit persisted in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A retrieved [`IndexEntry`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved entry.
    pub entry: IndexEntry,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// The embedding model an index was built with.
///
/// Written on first ingestion and checked on every later ingestion and
/// query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimensions: usize,
}
