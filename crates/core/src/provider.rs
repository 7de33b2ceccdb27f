//! The seam between the engines and the hosted model.
//!
//! A provider answers a message list in one piece or as a stream of text
//! deltas, and turns text into embedding vectors for retrieval. The
//! `ragdesk-providers` crate implements it for Gemini and for
//! OpenAI-compatible endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::Message;

/// One completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model identifier as the backend names it.
    pub model: String,

    /// System prompt, history and the new question, in order.
    pub messages: Vec<Message>,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens; backend default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.1
}

impl ProviderRequest {
    /// Request with the low default temperature and no output cap.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            stream: false,
        }
    }
}

/// The answer to a `complete()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub message: Message,

    pub usage: Option<Usage>,

    /// Model that answered, as reported by the backend.
    pub model: String,
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One increment of a streamed answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text appended since the previous chunk.
    #[serde(default)]
    pub content: Option<String>,

    /// Set on the last chunk only.
    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Texts to embed in one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One vector per input, in input order.
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
}

/// Receiving end of a streaming completion.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// A hosted language model reachable over some API.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs and health output.
    fn name(&self) -> &str;

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Stream the answer. Backends without streaming deliver it as one
    /// final chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let last = StreamChunk {
            content: Some(response.message.content),
            done: true,
            usage: response.usage,
        };
        let _ = tx.send(Ok(last)).await;
        Ok(rx)
    }

    /// Embed texts. Unsupported unless the backend overrides it.
    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "{} cannot produce embeddings",
            self.name()
        )))
    }

    /// Whether the backend is reachable with the configured credentials.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
