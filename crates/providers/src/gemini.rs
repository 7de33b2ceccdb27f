//! Google Gemini provider (Generative Language REST API).
//!
//! Supports:
//! - `generateContent` for complete responses
//! - `streamGenerateContent?alt=sse` for streaming
//! - `batchEmbedContents` for embeddings
//! - Safety settings applied to every harm category
//!
//! System messages are folded into `system_instruction`; assistant turns are
//! sent with the `model` role.

use async_trait::async_trait;
use futures::StreamExt;
use ragdesk_core::error::ProviderError;
use ragdesk_core::message::{Message, Role};
use ragdesk_core::provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, ProviderRequest, ProviderResponse,
    StreamChunk, Usage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::http;
use crate::sse::SseBuffer;

const API_KEY_HEADER: &str = "x-goog-api-key";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    safety_threshold: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            safety_threshold: "BLOCK_ONLY_HIGH".into(),
            client: http::client(timeout_secs)?,
        })
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_safety_threshold(mut self, threshold: impl Into<String>) -> Self {
        self.safety_threshold = threshold.into();
        self
    }

    /// `gemini-1.5-flash` and `models/gemini-1.5-flash` are both accepted.
    fn model_path(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    fn build_request(&self, request: &ProviderRequest) -> GenerateContentRequest {
        let (system, turns): (Vec<&Message>, Vec<&Message>) = request
            .messages
            .iter()
            .partition(|m| m.role == Role::System);

        let system_instruction = if system.is_empty() {
            None
        } else {
            let text = system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            Some(Content {
                role: None,
                parts: vec![Part { text }],
            })
        };

        let contents = turns
            .into_iter()
            .map(|m| Content {
                role: Some(match m.role {
                    Role::Assistant => "model".into(),
                    _ => "user".into(),
                }),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: (*category).into(),
                    threshold: self.safety_threshold.clone(),
                })
                .collect(),
        }
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        event_stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body);
        if event_stream {
            builder = builder.header(reqwest::header::ACCEPT, "text/event-stream");
        }

        let response = builder.send().await.map_err(http::transport)?;
        http::check_status("gemini", response).await
    }
}

/// Pull the text out of a response, or explain why there is none.
fn extract_text(response: GenerateContentResponse) -> Result<(String, Option<Usage>), ProviderError> {
    if let Some(feedback) = &response.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            return Err(ProviderError::ContentFiltered(format!("prompt blocked: {reason}")));
        }
    }

    let usage = response.usage_metadata.map(Usage::from);

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| http::malformed("no candidates"))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ProviderError::ContentFiltered("response blocked: SAFETY".into()));
    }

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok((text, usage))
}

#[async_trait]
impl ragdesk_core::Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = "gemini", model = %request.model, "generateContent");

        let path = format!("{}:generateContent", Self::model_path(&request.model));
        let response = self.post(&path, &self.build_request(&request), false).await?;
        let reply: GenerateContentResponse = http::read_json(response, "generateContent").await?;

        let model = reply
            .model_version
            .clone()
            .unwrap_or_else(|| request.model.clone());
        let (text, usage) = extract_text(reply)?;

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage,
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        debug!(provider = "gemini", model = %request.model, "streamGenerateContent");

        let path = format!("{}:streamGenerateContent?alt=sse", Self::model_path(&request.model));
        let response = self.post(&path, &self.build_request(&request), true).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_events(response, tx));
        Ok(rx)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        debug!(
            provider = "gemini",
            model = %request.model,
            count = request.inputs.len(),
            "batchEmbedContents"
        );

        let model_path = Self::model_path(&request.model);
        let body = BatchEmbedRequest {
            requests: request
                .inputs
                .iter()
                .map(|text| EmbedContentRequest {
                    model: model_path.clone(),
                    content: Content {
                        role: None,
                        parts: vec![Part { text: text.clone() }],
                    },
                })
                .collect(),
        };

        let path = format!("{model_path}:batchEmbedContents");
        let response = self.post(&path, &body, false).await?;
        let batch: BatchEmbedResponse = http::read_json(response, "batchEmbedContents").await?;

        if batch.embeddings.len() != request.inputs.len() {
            return Err(http::malformed(format_args!(
                "expected {} embeddings, got {}",
                request.inputs.len(),
                batch.embeddings.len()
            )));
        }

        Ok(EmbeddingResponse {
            embeddings: batch.embeddings.into_iter().map(|e| e.values).collect(),
            model: request.model,
        })
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models?pageSize=1", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(http::transport)?;

        Ok(response.status().is_success())
    }
}

/// Forward SSE events as chunks. Each event is a whole
/// `GenerateContentResponse` carrying a text delta; usage comes with the last.
async fn pump_events(response: reqwest::Response, tx: mpsc::Sender<Result<StreamChunk, ProviderError>>) {
    let mut bytes = response.bytes_stream();
    let mut buffer = SseBuffer::default();
    let mut usage = None;

    while let Some(next) = bytes.next().await {
        let slice = match next {
            Ok(slice) => slice,
            Err(e) => {
                let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                return;
            }
        };

        for data in buffer.push(&slice) {
            let event: GenerateContentResponse = match serde_json::from_str(&data) {
                Ok(event) => event,
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE payload");
                    continue;
                }
            };

            let blocked = event
                .prompt_feedback
                .as_ref()
                .is_some_and(|f| f.block_reason.is_some());
            if event.candidates.is_empty() && !blocked {
                // usage-only trailer
                usage = event.usage_metadata.map(Usage::from).or(usage);
                continue;
            }

            let (text, event_usage) = match extract_text(event) {
                Ok(extracted) => extracted,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            usage = event_usage.or(usage);
            if text.is_empty() {
                continue;
            }

            let chunk = StreamChunk {
                content: Some(text),
                done: false,
                usage: None,
            };
            if tx.send(Ok(chunk)).await.is_err() {
                return;
            }
        }
    }

    let _ = tx
        .send(Ok(StreamChunk {
            content: None,
            done: true,
            usage,
        }))
        .await;
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(rename = "modelVersion", default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

impl From<UsageMetadata> for Usage {
    fn from(u: UsageMetadata) -> Self {
        Self {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedContentRequest>,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdesk_core::Provider;

    fn provider() -> GeminiProvider {
        GeminiProvider::new("test-key", 30).unwrap()
    }

    #[test]
    fn model_path_is_normalized() {
        assert_eq!(
            GeminiProvider::model_path("gemini-1.5-flash-latest"),
            "models/gemini-1.5-flash-latest"
        );
        assert_eq!(
            GeminiProvider::model_path("models/gemini-1.5-flash-latest"),
            "models/gemini-1.5-flash-latest"
        );
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let request = ProviderRequest::new(
            "gemini-1.5-flash-latest",
            vec![
                Message::system("Answer from context."),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("what time is it"),
            ],
        );
        let body = serde_json::to_value(provider().build_request(&request)).unwrap();

        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "Answer from context."
        );
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "what time is it");
    }

    #[test]
    fn safety_settings_cover_every_category() {
        let p = provider().with_safety_threshold("BLOCK_NONE");
        let request = ProviderRequest::new("m", vec![Message::user("x")]);
        let body = serde_json::to_value(p.build_request(&request)).unwrap();
        let settings = body["safetySettings"].as_array().unwrap();
        assert_eq!(settings.len(), 4);
        assert!(settings.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
    }

    #[test]
    fn generation_config_omits_unset_max_tokens() {
        let request = ProviderRequest::new("m", vec![Message::user("x")]);
        let body = serde_json::to_value(provider().build_request(&request)).unwrap();
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn extract_text_joins_parts() {
        let data = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(data).unwrap();
        let (text, usage) = extract_text(parsed).unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn blocked_prompt_is_content_filtered() {
        let data = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(data).unwrap();
        assert!(matches!(
            extract_text(parsed),
            Err(ProviderError::ContentFiltered(_))
        ));
    }

    #[test]
    fn safety_finish_reason_is_content_filtered() {
        let data = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(data).unwrap();
        assert!(matches!(
            extract_text(parsed),
            Err(ProviderError::ContentFiltered(_))
        ));
    }

    #[test]
    fn empty_candidates_is_api_error() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            extract_text(parsed),
            Err(ProviderError::ApiError { .. })
        ));
    }

    #[test]
    fn parse_batch_embed_response() {
        let data = r#"{"embeddings": [{"values": [0.1, 0.2]}, {"values": [0.3, 0.4]}]}"#;
        let parsed: BatchEmbedResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1].values, vec![0.3, 0.4]);
    }

    #[test]
    fn base_url_override_trims_slash() {
        let p = provider().with_base_url("http://localhost:9999/v1beta/");
        assert_eq!(p.base_url, "http://localhost:9999/v1beta");
        assert_eq!(p.name(), "gemini");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let p = GeminiProvider::new("k", 2)
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let err = p
            .complete(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Network(_) | ProviderError::Timeout(_)
        ));
    }
}
