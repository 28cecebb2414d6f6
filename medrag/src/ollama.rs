//! Local inference backend: an [Ollama](https://ollama.com) server.
//!
//! Provides [`OllamaEmbeddingProvider`] (`/api/embed`) and
//! [`OllamaGenerator`] (`/api/generate`). This module is only available when
//! the `ollama` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::{GenerationOptions, TextGenerator};

/// The default Ollama server address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const SERVICE: &str = "Ollama";

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
        RagError::InvalidConfiguration(format!("cannot build HTTP client for Ollama: {e}"))
    })
}

fn send_err(e: reqwest::Error) -> RagError {
    error!(provider = SERVICE, error = %e, "request failed");
    if e.is_connect() || e.is_timeout() {
        RagError::ServiceUnreachable { service: SERVICE.into(), message: e.to_string() }
    } else {
        RagError::LlmError { backend: SERVICE.into(), message: format!("request failed: {e}") }
    }
}

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error).unwrap_or(body);
    format!("API returned {status}: {detail}")
}

// ── Ollama API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    num_predict: u32,
}

impl From<&GenerationOptions> for GenerateOptions {
    fn from(o: &GenerationOptions) -> Self {
        Self { temperature: o.temperature, top_p: o.top_p, num_predict: o.max_tokens }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// An [`EmbeddingProvider`] backed by a local Ollama server.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::ollama::OllamaEmbeddingProvider;
///
/// let provider = OllamaEmbeddingProvider::new("http://localhost:11434", "all-minilm", 384)?;
/// let embedding = provider.embed("myocardial infarction").await?;
/// ```
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbeddingProvider {
    /// Create a provider for `model`, which must produce `dimensions`-sized vectors.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(60))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::EmbeddingError {
            provider: SERVICE.into(),
            message: "API returned empty response".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = SERVICE, batch_size = texts.len(), model = %self.model, "embedding batch");

        let request = EmbedRequest { model: &self.model, input: texts.to_vec() };
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(send_err)?;

        if !response.status().is_success() {
            let message = error_detail(response).await;
            error!(provider = SERVICE, %message, "embedding API error");
            return Err(RagError::EmbeddingError { provider: SERVICE.into(), message });
        }

        let body: EmbedResponse = response.json().await.map_err(|e| RagError::EmbeddingError {
            provider: SERVICE.into(),
            message: format!("failed to parse response: {e}"),
        })?;
        Ok(body.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// A [`TextGenerator`] backed by a local Ollama server.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    name: String,
}

impl OllamaGenerator {
    /// Create a generator for `model`. `timeout` bounds each HTTP request.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: format!("ollama/{model}"),
            model,
        })
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(send_err)?;
        if !response.status().is_success() {
            let message = error_detail(response).await;
            return Err(RagError::LlmError { backend: SERVICE.into(), message });
        }
        let tags: TagsResponse = response.json().await.map_err(|e| RagError::LlmError {
            backend: SERVICE.into(),
            message: format!("failed to parse model list: {e}"),
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "ollama generate");

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: options.into(),
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(send_err)?;

        if !response.status().is_success() {
            let message = error_detail(response).await;
            error!(model = %self.model, %message, "generate API error");
            return Err(RagError::LlmError { backend: SERVICE.into(), message });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| RagError::LlmError {
            backend: SERVICE.into(),
            message: format!("failed to parse response: {e}"),
        })?;
        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_uses_ollama_option_names() {
        let request = GenerateRequest {
            model: "llama3.1",
            prompt: "hi",
            stream: false,
            options: (&GenerationOptions::TRANSLATION).into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["options"]["num_predict"], 50);
        assert!(json["options"].get("top_p").is_none());
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn parses_embed_and_tags_responses() {
        let embed: EmbedResponse =
            serde_json::from_str(r#"{"model":"all-minilm","embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        assert_eq!(embed.embeddings.len(), 2);

        let tags: TagsResponse =
            serde_json::from_str(r#"{"models":[{"name":"llama3.1:8b","size":1}]}"#).unwrap();
        assert_eq!(tags.models[0].name, "llama3.1:8b");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider = OllamaEmbeddingProvider::new("http://localhost:11434/", "all-minilm", 384).unwrap();
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }
}
