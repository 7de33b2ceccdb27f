//! Shared test doubles for the engines and the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ragdesk_core::error::{HistoryError, ProviderError, RetrievalError};
use ragdesk_core::knowledge::{ContextSnippet, DocumentChunk, KnowledgeStore, rank};
use ragdesk_core::message::{Message, Role};
use ragdesk_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use tokio::sync::{Notify, mpsc};

use crate::chat_memory::ChatStore;

type Handler = dyn Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync;

/// A provider whose answer is computed from the request by a closure.
pub struct FnProvider {
    handler: Box<Handler>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ProviderRequest>>,
}

impl FnProvider {
    pub fn new(
        handler: impl Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `text`.
    pub fn text(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fail with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    /// Sleep before answering so concurrent callers interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FnProvider {
    fn name(&self) -> &str {
        "fn_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(request.clone());
        let text = (self.handler)(&request)?;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
        })
    }
}

type Item = Result<StreamChunk, ProviderError>;

/// A streaming-only provider. The first scripted item is sent at once,
/// the rest after `release`.
pub struct GatedStream {
    items: Mutex<Vec<Item>>,
    gate: Arc<Notify>,
}

impl GatedStream {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

pub fn text_chunk(text: &str) -> Item {
    Ok(StreamChunk {
        content: Some(text.to_string()),
        done: false,
        usage: None,
    })
}

pub fn done_chunk() -> Item {
    Ok(StreamChunk {
        content: None,
        done: true,
        usage: None,
    })
}

#[async_trait]
impl Provider for GatedStream {
    fn name(&self) -> &str {
        "gated_stream"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let items = std::mem::take(&mut *self.items.lock().unwrap());
        let gate = self.gate.clone();
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut items = items.into_iter();
            if let Some(first) = items.next() {
                if tx.send(first).await.is_err() {
                    return;
                }
            }
            gate.notified().await;
            for item in items {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// The system prompt of a request, if it has one.
pub fn system_prompt(request: &ProviderRequest) -> Option<&str> {
    request
        .messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
}

/// Is this the fallback path's single-turn query prompt?
pub fn is_query_prompt(request: &ProviderRequest) -> bool {
    request.messages.len() == 1 && request.messages[0].content.ends_with("Answer: ")
}

#[derive(Default)]
struct StoreState {
    snippets: Vec<ContextSnippet>,
    failing: bool,
    queries: Vec<(String, usize)>,
}

/// A knowledge store returning fixed snippets and recording queries.
#[derive(Clone, Default)]
pub struct StaticStore {
    state: Arc<Mutex<StoreState>>,
}

impl StaticStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(entries: &[(&str, &str)]) -> Self {
        let mut snippets: Vec<ContextSnippet> = entries
            .iter()
            .map(|(text, source)| ContextSnippet {
                text: text.to_string(),
                source_id: source.to_string(),
                relevance_rank: 0,
                score: 0.5,
            })
            .collect();
        rank(&mut snippets);
        Self {
            state: Arc::new(Mutex::new(StoreState {
                snippets,
                ..StoreState::default()
            })),
        }
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().failing = true;
        store
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl KnowledgeStore for StaticStore {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
        let mut state = self.state.lock().unwrap();
        state.queries.push((query.to_string(), top_k));
        if state.failing {
            return Err(RetrievalError::Connection("store offline".into()));
        }
        Ok(state.snippets.iter().take(top_k).cloned().collect())
    }

    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, RetrievalError> {
        Ok(chunks.len())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.state.lock().unwrap().snippets.len())
    }
}

/// A history whose `clear` always fails.
#[derive(Default)]
pub struct UnclearableHistory {
    messages: Vec<Message>,
}

impl ChatStore for UnclearableHistory {
    fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn put(&mut self, message: Message) -> Result<(), HistoryError> {
        self.messages.push(message);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HistoryError> {
        Err(HistoryError::Storage("disk on fire".into()))
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}
