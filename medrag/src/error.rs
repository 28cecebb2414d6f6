//! Error types for the `medrag` crate.

use thiserror::Error;

/// Errors that can occur anywhere in the ingestion or question-answering path.
#[derive(Debug, Error)]
pub enum RagError {
    /// Bad chunking parameters, dimension disagreement or any other setting
    /// that makes the pipeline unusable. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input rejected for a single item (for example empty text to embed).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The index was built with a different embedding model than the one
    /// currently configured. The operator must re-ingest.
    #[error("Embedding model mismatch: index built with '{indexed}', active model is '{active}'")]
    ModelMismatch {
        /// Model recorded in the index manifest.
        indexed: String,
        /// Model of the active embedding provider.
        active: String,
    },

    /// The question could not be translated into the corpus language.
    #[error("Translation unavailable: {0}")]
    TranslationUnavailable(String),

    /// No answer could be generated.
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// The persisted index could not be read back.
    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The language model answered with an error or an unusable payload.
    #[error("LLM error ({backend}): {message}")]
    LlmError {
        /// The inference backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An external service could not be reached.
    #[error("Service unreachable ({service}): {message}")]
    ServiceUnreachable {
        /// The service that could not be reached.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// An external call exceeded its time limit.
    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout {
        /// The operation that was cut off.
        operation: String,
        /// The limit that was exceeded, in milliseconds.
        limit_ms: u64,
    },

    /// A document could not be obtained from the document source.
    #[error("Failed to fetch document '{id}': {message}")]
    DocumentFetch {
        /// Identifier of the requested document.
        id: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    /// Errors that must abort an ingestion batch or a query outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::ModelMismatch { .. } | Self::IndexCorrupted(_)
        )
    }

    /// Errors worth another attempt: the remote side may answer next time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnreachable { .. } | Self::Timeout { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_transient_are_disjoint() {
        let errors = [
            RagError::InvalidConfiguration("x".into()),
            RagError::ModelMismatch { indexed: "a".into(), active: "b".into() },
            RagError::IndexCorrupted("x".into()),
            RagError::Timeout { operation: "embed".into(), limit_ms: 1_000 },
            RagError::ServiceUnreachable { service: "ollama".into(), message: "refused".into() },
            RagError::InvalidInput("x".into()),
        ];
        for err in &errors {
            assert!(!(err.is_fatal() && err.is_transient()), "{err}");
        }
        assert!(errors[0].is_fatal());
        assert!(errors[3].is_transient());
        assert!(!errors[5].is_fatal() && !errors[5].is_transient());
    }

    #[test]
    fn model_mismatch_names_both_models() {
        let err = RagError::ModelMismatch { indexed: "minilm".into(), active: "bge".into() };
        let text = err.to_string();
        assert!(text.contains("minilm") && text.contains("bge"));
    }
}
