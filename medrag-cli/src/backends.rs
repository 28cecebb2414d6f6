//! Concrete services chosen by configuration.

use std::sync::Arc;

use anyhow::Context;
use medrag::{
    Backend, EmbeddingProvider, MedragConfig, OllamaEmbeddingProvider, OllamaGenerator,
    OpenAIEmbeddingProvider, OpenAIGenerator, SqliteVectorStore, TextGenerator,
};

/// The configured URL, except that the Ollama default is swapped for the
/// OpenAI endpoint when the OpenAI backend is selected.
fn base_url(backend: Backend, configured: &str) -> String {
    match backend {
        Backend::OpenAi if configured == medrag::ollama::DEFAULT_BASE_URL => {
            medrag::openai::DEFAULT_BASE_URL.to_string()
        }
        _ => configured.to_string(),
    }
}

pub fn embedding_provider(config: &MedragConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let url = base_url(config.embedding_backend, &config.embedding_base_url);
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding_backend {
        Backend::Ollama => Arc::new(OllamaEmbeddingProvider::new(
            url,
            &config.embedding_model,
            config.embedding_dimensions,
        )?),
        Backend::OpenAi => Arc::new(
            OpenAIEmbeddingProvider::from_env()?
                .with_base_url(url)
                .with_model(&config.embedding_model)
                .with_dimensions(config.embedding_dimensions),
        ),
    };
    Ok(provider)
}

pub fn llm(config: &MedragConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let url = base_url(config.llm_backend, &config.llm_base_url);
    let timeout = config.generation_timeout();
    let llm: Arc<dyn TextGenerator> = match config.llm_backend {
        Backend::Ollama => Arc::new(OllamaGenerator::new(url, &config.llm_model, timeout)?),
        Backend::OpenAi => {
            Arc::new(OpenAIGenerator::from_env(&config.llm_model, timeout)?.with_base_url(url))
        }
    };
    Ok(llm)
}

pub async fn vector_store(config: &MedragConfig) -> anyhow::Result<Arc<SqliteVectorStore>> {
    let store = SqliteVectorStore::open(&config.index_path)
        .await
        .with_context(|| format!("opening index at {}", config.index_path.display()))?;
    Ok(Arc::new(store))
}
