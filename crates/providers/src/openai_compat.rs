//! Provider for endpoints speaking the OpenAI wire format.
//!
//! Covers OpenAI, OpenRouter, Ollama, vLLM, Together AI, Groq, DeepSeek and
//! anything else serving `/chat/completions`, `/embeddings` and `/models`.
//! Streaming uses SSE with `stream_options.include_usage` so the final
//! event carries token counts.

use async_trait::async_trait;
use futures::StreamExt;
use ragdesk_core::error::ProviderError;
use ragdesk_core::message::Message;
use ragdesk_core::provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest,
    ProviderResponse, StreamChunk, Usage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::http;
use crate::sse::SseBuffer;

const FILTERED: &str = "content_filter";

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: http::client(timeout_secs)?,
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        event_stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body);
        if event_stream {
            builder = builder.header(reqwest::header::ACCEPT, "text/event-stream");
        }

        let response = builder.send().await.map_err(http::transport)?;
        http::check_status(&self.name, response).await
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Chat completion");

        let response = self
            .post("/chat/completions", &ChatCompletionBody::new(&request, false), false)
            .await?;
        let completion: ChatCompletion = http::read_json(response, "chat completion").await?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| http::malformed("chat completion had no choices"))?;
        if choice.finish_reason.as_deref() == Some(FILTERED) {
            return Err(ProviderError::ContentFiltered(format!("{} finish_reason={FILTERED}", self.name)));
        }

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage: completion.usage.map(Usage::from),
            model: completion.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Streaming chat completion");

        let response = self
            .post("/chat/completions", &ChatCompletionBody::new(&request, true), true)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_events(response, tx, self.name.clone()));
        Ok(rx)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Embedding"
        );

        let body = EmbeddingsBody {
            model: &request.model,
            input: &request.inputs,
            encoding_format: "float",
        };
        let response = self.post("/embeddings", &body, false).await?;
        let mut embeddings: EmbeddingList = http::read_json(response, "embeddings").await?;

        // Entries may come back out of order
        embeddings.data.sort_by_key(|d| d.index);
        Ok(EmbeddingResponse {
            embeddings: embeddings.data.into_iter().map(|d| d.embedding).collect(),
            model: embeddings.model,
        })
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(http::transport)?;
        Ok(response.status().is_success())
    }
}

/// What one SSE payload means for the consumer.
#[derive(Debug, PartialEq)]
enum Step {
    /// A content delta, usage totals, or both.
    Delta {
        text: Option<String>,
        usage: Option<Usage>,
    },
    Done,
    Filtered,
    Skip,
}

fn interpret(data: &str) -> Step {
    if data == "[DONE]" {
        return Step::Done;
    }

    let event: CompletionEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE payload");
            return Step::Skip;
        }
    };

    let choice = event.choices.into_iter().next();
    if choice
        .as_ref()
        .is_some_and(|c| c.finish_reason.as_deref() == Some(FILTERED))
    {
        return Step::Filtered;
    }

    // Some backends put usage on the last content event, others on a
    // trailing event with no choices
    let text = choice
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty());
    let usage = event.usage.map(Usage::from);
    if text.is_none() && usage.is_none() {
        return Step::Skip;
    }
    Step::Delta { text, usage }
}

async fn pump_events(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<StreamChunk, ProviderError>>,
    provider: String,
) {
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
            match interpret(&data) {
                Step::Skip => {}
                Step::Delta { text, usage: totals } => {
                    usage = totals.or(usage);
                    let Some(text) = text else { continue };
                    let chunk = StreamChunk {
                        content: Some(text),
                        done: false,
                        usage: None,
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                Step::Done => {
                    let _ = tx.send(Ok(final_chunk(usage))).await;
                    return;
                }
                Step::Filtered => {
                    let _ = tx
                        .send(Err(ProviderError::ContentFiltered(format!("{provider} finish_reason={FILTERED}"))))
                        .await;
                    return;
                }
            }
        }
    }

    // Body closed without [DONE]; a last line may lack its newline
    if let Some(Step::Delta { text, usage: totals }) = buffer.finish().map(|data| interpret(&data)) {
        usage = totals.or(usage);
        if let Some(text) = text {
            let chunk = StreamChunk {
                content: Some(text),
                done: false,
                usage: None,
            };
            let _ = tx.send(Ok(chunk)).await;
        }
    }
    let _ = tx.send(Ok(final_chunk(usage))).await;
}

fn final_chunk(usage: Option<Usage>) -> StreamChunk {
    StreamChunk {
        content: None,
        done: true,
        usage,
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl<'a> ChatCompletionBody<'a> {
    fn new(request: &'a ProviderRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            stream,
            max_tokens: request.max_tokens,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    model: String,
    choices: Vec<CompletionChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct CompletionEvent {
    #[serde(default)]
    choices: Vec<EventChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct EventChoice {
    #[serde(default)]
    delta: EventDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct EventDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingList {
    data: Vec<EmbeddingEntry>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        let provider = OpenAiCompatProvider::new("ollama", "http://localhost:11434/v1/", "", 30).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn body_carries_roles_and_options() {
        let mut request = ProviderRequest::new(
            "gpt-4o-mini",
            vec![Message::system("ctx"), Message::user("q"), Message::assistant("a")],
        );
        request.max_tokens = Some(256);

        let streaming = serde_json::to_value(ChatCompletionBody::new(&request, true)).unwrap();
        assert_eq!(streaming["messages"][0]["role"], "system");
        assert_eq!(streaming["messages"][2]["role"], "assistant");
        assert_eq!(streaming["stream"], true);
        assert_eq!(streaming["stream_options"]["include_usage"], true);
        assert_eq!(streaming["max_tokens"], 256);

        request.max_tokens = None;
        let plain = serde_json::to_value(ChatCompletionBody::new(&request, false)).unwrap();
        assert!(plain.get("stream_options").is_none());
        assert!(plain.get("max_tokens").is_none());
    }

    #[test]
    fn interpret_text_delta() {
        let step = interpret(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#);
        assert_eq!(
            step,
            Step::Delta {
                text: Some("Hel".into()),
                usage: None
            }
        );
    }

    #[test]
    fn interpret_role_only_delta_is_skipped() {
        assert_eq!(interpret(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), Step::Skip);
        assert_eq!(interpret(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#), Step::Skip);
    }

    #[test]
    fn interpret_trailing_usage_and_done() {
        let step = interpret(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        assert_eq!(
            step,
            Step::Delta {
                text: None,
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                })
            }
        );
        assert_eq!(interpret("[DONE]"), Step::Done);
    }

    #[test]
    fn usage_on_last_content_event_keeps_the_text() {
        let step = interpret(
            r#"{"choices":[{"delta":{"content":"last words"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        );
        assert_eq!(
            step,
            Step::Delta {
                text: Some("last words".into()),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                })
            }
        );
    }

    #[test]
    fn interpret_content_filter() {
        let step = interpret(r#"{"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#);
        assert_eq!(step, Step::Filtered);
    }

    #[test]
    fn interpret_garbage_is_skipped() {
        assert_eq!(interpret("{not json"), Step::Skip);
    }

    #[test]
    fn embeddings_parse_and_reorder() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ],
            "model": "text-embedding-3-small"
        }"#;
        let mut list: EmbeddingList = serde_json::from_str(data).unwrap();
        list.data.sort_by_key(|d| d.index);
        assert_eq!(list.data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(list.model, "text-embedding-3-small");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let provider = OpenAiCompatProvider::new("local", "http://127.0.0.1:1/v1", "", 2).unwrap();
        let err = provider
            .complete(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_) | ProviderError::Timeout(_)));
    }
}
