//! Document chunking.
//!
//! Chunks are measured in characters (Unicode scalar values), never bytes,
//! so multi-byte text is never split inside a code point.

use crate::document::{Chunk, Document, keys};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no
/// embeddings. Embeddings are attached later by the ingestion pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into fixed-size chunks by character count with overlap.
///
/// Chunk `i` starts at character offset `i * (chunk_size - chunk_overlap)`
/// and holds at most `chunk_size` characters. Splitting stops with the first
/// chunk that reaches the end of the text, so only the last chunk may be
/// shorter than `chunk_size` and no chunk lies entirely inside the previous
/// one.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(500, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Character ranges `(start, end)` of the chunks of a text with `len`
    /// characters.
    pub fn spans(&self, len: usize) -> Vec<(usize, usize)> {
        let step = self.chunk_size - self.chunk_overlap;
        let mut spans = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + self.chunk_size).min(len);
            spans.push((start, end));
            if end == len {
                break;
            }
            start += step;
        }
        spans
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if document.text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every character boundary, including the end.
        let boundaries: Vec<usize> = document
            .text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(document.text.len()))
            .collect();
        let char_len = boundaries.len() - 1;
        let base_metadata = document.metadata();

        self.spans(char_len)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| {
                let mut metadata = base_metadata.clone();
                metadata.insert(keys::CHUNK_INDEX.to_string(), chunk_index.to_string());
                Chunk {
                    document_id: document.id.clone(),
                    chunk_index,
                    start,
                    end,
                    text: document.text[boundaries[start]..boundaries[end]].to_string(),
                    metadata,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document { id: "PMID1".into(), title: "T".into(), text: text.into(), ..Default::default() }
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(FixedSizeChunker::new(0, 0), Err(RagError::InvalidConfiguration(_))));
        assert!(matches!(FixedSizeChunker::new(10, 10), Err(RagError::InvalidConfiguration(_))));
        assert!(matches!(FixedSizeChunker::new(10, 11), Err(RagError::InvalidConfiguration(_))));
        assert!(FixedSizeChunker::new(10, 9).is_ok());
    }

    #[test]
    fn twelve_hundred_chars_make_three_chunks() {
        let chunker = FixedSizeChunker::new(500, 50).unwrap();
        let chunks = chunker.chunk(&doc(&"a".repeat(1200)));
        let spans: Vec<_> = chunks.iter().map(|c| (c.chunk_index, c.start, c.end)).collect();
        assert_eq!(spans, vec![(0, 0, 500), (1, 450, 950), (2, 900, 1200)]);
        assert_eq!(chunks[1].metadata.get(keys::CHUNK_INDEX).map(String::as_str), Some("1"));
        assert_eq!(chunks[2].id(), "PMID1_2");
    }

    #[test]
    fn stops_at_first_chunk_reaching_the_end() {
        let chunker = FixedSizeChunker::new(500, 50).unwrap();
        assert_eq!(chunker.spans(950), vec![(0, 500), (450, 950)]);
        assert_eq!(chunker.spans(500), vec![(0, 500)]);
        assert_eq!(chunker.spans(20), vec![(0, 20)]);
        assert!(chunker.spans(0).is_empty());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = FixedSizeChunker::new(10, 2).unwrap();
        assert!(chunker.chunk(&doc("")).is_empty());
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunker = FixedSizeChunker::new(4, 1).unwrap();
        let chunks = chunker.chunk(&doc("心筋梗塞の治療法"));
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["心筋梗塞", "塞の治療", "療法"]);
    }

    #[test]
    fn chunks_carry_document_metadata() {
        let chunker = FixedSizeChunker::new(10, 2).unwrap();
        let chunks = chunker.chunk(&doc("some literature text"));
        assert!(chunks.iter().all(|c| c.metadata.get(keys::DOCUMENT_ID).map(String::as_str) == Some("PMID1")));
        assert!(chunks.iter().all(|c| c.title() == Some("T")));
    }
}
