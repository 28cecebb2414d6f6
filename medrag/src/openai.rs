//! Remote API backend for OpenAI-compatible services.
//!
//! Provides [`OpenAIEmbeddingProvider`] (`/v1/embeddings`) and
//! [`OpenAIGenerator`] (`/v1/chat/completions`). This module is only
//! available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::{GenerationOptions, TextGenerator};

/// The default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SERVICE: &str = "OpenAI";

/// Model used when none is configured, and the width it produces.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_WIDTH: usize = 1536;

fn api_key_from_env() -> Result<String> {
    std::env::var("OPENAI_API_KEY").map_err(|_| {
        RagError::InvalidConfiguration("OPENAI_API_KEY environment variable not set".into())
    })
}

/// Authenticated JSON POSTs against one OpenAI-compatible endpoint.
struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ApiClient {
    fn new(api_key: String, timeout: Option<Duration>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::InvalidConfiguration("OpenAI API key must not be empty".into()));
        }
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| {
            RagError::InvalidConfiguration(format!("cannot build HTTP client for OpenAI: {e}"))
        })?;
        Ok(Self { http, api_key, base_url: DEFAULT_BASE_URL.into() })
    }

    fn set_base_url(&mut self, base_url: String) {
        self.base_url = base_url.trim_end_matches('/').to_string();
    }

    /// POST `body` to `path`. Non-2xx replies and undecodable bodies are
    /// turned into errors by `fail`; transport failures become
    /// `ServiceUnreachable` when the server could not be reached.
    async fn post<B, R>(&self, path: &str, body: &B, fail: fn(String) -> RagError) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = SERVICE, path, error = %e, "request failed");
                if e.is_connect() || e.is_timeout() {
                    RagError::ServiceUnreachable { service: SERVICE.into(), message: e.to_string() }
                } else {
                    fail(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let detail =
                serde_json::from_str::<ErrorResponse>(&raw).map(|e| e.error.message).unwrap_or(raw);
            error!(provider = SERVICE, path, %status, %detail, "API error");
            return Err(fail(format!("{path} returned {status}: {detail}")));
        }

        response.json().await.map_err(|e| fail(format!("undecodable {path} reply: {e}")))
    }
}

fn embedding_error(message: String) -> RagError {
    RagError::EmbeddingError { provider: SERVICE.into(), message }
}

fn llm_error(message: String) -> RagError {
    RagError::LlmError { backend: SERVICE.into(), message }
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedReply {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Embeds chunks and queries through `/embeddings`.
///
/// Without configuration this uses `text-embedding-3-small` at its native
/// 1536 dimensions. [`with_dimensions`](Self::with_dimensions) asks the API
/// for shorter vectors, which is what keeps an index built against a
/// 384-wide local model and a remote one from being mixed up: the manifest
/// records both the model name and the width.
///
/// ```rust,ignore
/// use medrag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(512);
/// let v = provider.embed("acute kidney injury after contrast").await?;
/// assert_eq!(v.len(), 512);
/// ```
pub struct OpenAIEmbeddingProvider {
    api: ApiClient,
    model: String,
    width: usize,
    /// Sent as `dimensions` only when explicitly chosen.
    requested_width: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(api_key.into(), None)?,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            width: DEFAULT_EMBEDDING_WIDTH,
            requested_width: None,
        })
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the provider at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.set_base_url(base_url.into());
        self
    }

    /// Request `width`-dimensional vectors from the API.
    pub fn with_dimensions(mut self, width: usize) -> Self {
        self.width = width;
        self.requested_width = Some(width);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| embedding_error("no vector returned for query".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = SERVICE, model = %self.model, count = texts.len(), "requesting embeddings");

        let body = EmbedBody { model: &self.model, input: texts, dimensions: self.requested_width };
        let mut reply: EmbedReply = self.api.post("embeddings", &body, embedding_error).await?;
        if reply.data.len() != texts.len() {
            return Err(embedding_error(format!(
                "asked for {} vectors, received {}",
                texts.len(),
                reply.data.len()
            )));
        }
        reply.data.sort_by_key(|item| item.index);
        Ok(reply.data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.width
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// A [`TextGenerator`] backed by an OpenAI-compatible chat completions API.
///
/// The prompt is sent as a single user message.
pub struct OpenAIGenerator {
    api: ApiClient,
    model: String,
    name: String,
}

impl OpenAIGenerator {
    /// Create a generator for `model`. `timeout` bounds each HTTP request.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            api: ApiClient::new(api_key.into(), Some(timeout))?,
            name: format!("openai/{model}"),
            model,
        })
    }

    /// Create a generator using the `OPENAI_API_KEY` environment variable.
    pub fn from_env(model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::new(api_key_from_env()?, model, timeout)
    }

    /// Point the generator at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.set_base_url(base_url.into());
        self
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "chat completion");

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
        };
        let reply: ChatResponse = self.api.post("chat/completions", &request, llm_error).await?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| llm_error("response contained no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            OpenAIEmbeddingProvider::new(""),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            OpenAIGenerator::new("", "gpt-4o-mini", Duration::from_secs(5)),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn dimension_override_is_reported() {
        let provider = OpenAIEmbeddingProvider::new("sk-test").unwrap().with_dimensions(256);
        assert_eq!(provider.dimensions(), 256);
        assert_eq!(provider.model_id(), "text-embedding-3-small");
    }

    #[test]
    fn embedding_items_are_reordered_by_index() {
        let mut reply: EmbedReply = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[0.2]},{"index":0,"embedding":[0.1]}]}"#,
        )
        .unwrap();
        reply.data.sort_by_key(|item| item.index);
        assert_eq!(reply.data[0].embedding, vec![0.1]);
    }

    #[test]
    fn parses_chat_response() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Metformin."}}]}"#,
        )
        .unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("Metformin."));
    }
}
