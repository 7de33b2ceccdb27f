//! Conversation session: one history plus the two answer strategies.
//!
//! `chat` tries the conversational path first. Any failure there is logged
//! with its [`ErrorKind`](ragdesk_core::ErrorKind), the history is reset and
//! the single-turn query path answers instead. If that fails too the caller
//! gets [`APOLOGY`]. No error ever leaves a session.
//!
//! The history sits behind a `tokio::sync::Mutex` that is held for the whole
//! operation, so calls on one session run one at a time.

use std::sync::Arc;

use ragdesk_config::AppConfig;
use ragdesk_core::knowledge::KnowledgeStore;
use ragdesk_core::message::{Message, SessionId};
use ragdesk_core::provider::Provider;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::chat_engine::{ChatEngine, GenerationSettings};
use crate::chat_memory::{ChatMemoryBuffer, ChatStore};
use crate::prompt::PromptComposer;
use crate::query_engine::QueryEngine;
use crate::sanitize::sanitize;

/// Returned when both strategies fail.
pub const APOLOGY: &str = "Sorry, the service is unavailable right now. Please try again later!";

const STREAM_BUFFER: usize = 64;

struct Engines {
    chat: ChatEngine,
    query: QueryEngine,
}

/// Builds sessions that share one set of engines.
#[derive(Clone)]
pub struct SessionFactory {
    engines: Arc<Engines>,
    token_limit: usize,
}

impl SessionFactory {
    pub fn new(
        provider: Arc<dyn Provider>,
        knowledge: Arc<dyn KnowledgeStore>,
        composer: Arc<PromptComposer>,
        config: &AppConfig,
    ) -> Self {
        let settings = GenerationSettings::from_config(&config.completion);
        let chat = ChatEngine::new(
            provider.clone(),
            knowledge.clone(),
            composer.clone(),
            settings.clone(),
            config.session.chat_top_k,
        );
        let query = QueryEngine::new(
            provider,
            knowledge,
            composer,
            settings,
            config.session.fallback_top_k,
            config.session.context_window_tokens,
        );

        Self {
            engines: Arc::new(Engines { chat, query }),
            token_limit: config.session.token_limit,
        }
    }

    /// A fresh session with an empty token-bounded history.
    pub fn create(&self, id: SessionId) -> Session {
        self.create_with_store(id, Box::new(ChatMemoryBuffer::new(self.token_limit)))
    }

    /// A session backed by a caller-supplied history store.
    pub fn create_with_store(&self, id: SessionId, store: Box<dyn ChatStore>) -> Session {
        debug!(session = %id, "Session created");
        Session {
            id,
            engines: self.engines.clone(),
            history: Arc::new(Mutex::new(store)),
        }
    }
}

/// One logical conversation. Clones share the same history.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    engines: Arc<Engines>,
    history: Arc<Mutex<Box<dyn ChatStore>>>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Answer `query`. Always returns text.
    pub async fn chat(&self, query: &str) -> String {
        let question = sanitize(query);
        let mut history = self.history.lock().await;
        let turns = history.messages();

        let primary_err = match self.engines.chat.chat(&turns, &question).await {
            Ok(answer) => {
                record_turn(&mut **history, &self.id, &question, &answer);
                return answer;
            }
            Err(e) => e,
        };

        error!(
            session = %self.id,
            kind = %primary_err.kind(),
            error = %primary_err,
            "Chat engine failed, falling back to query engine"
        );

        let standalone = match self.engines.chat.condense(&turns, &question).await {
            Ok(standalone) => standalone,
            Err(e) => {
                warn!(session = %self.id, kind = %e.kind(), "Condensation failed, using the raw question");
                question.clone()
            }
        };

        if let Err(e) = history.clear() {
            warn!(session = %self.id, error = %e, "Failed to reset history before fallback");
        }

        match self.engines.query.query(&standalone).await {
            Ok(answer) => {
                info!(session = %self.id, "Answered by query engine");
                answer
            }
            Err(e) => {
                error!(session = %self.id, kind = %e.kind(), error = %e, "Query engine failed");
                APOLOGY.to_string()
            }
        }
    }

    /// Stream the conversational answer as text chunks.
    ///
    /// The turn is recorded once the stream completes. If the answer cannot
    /// be started, the history is reset and the returned stream is empty.
    /// Dropping the receiver cancels the turn.
    pub async fn stream_chat(&self, query: &str) -> mpsc::Receiver<String> {
        match self.start_stream(query).await {
            Some(rx) => rx,
            None => mpsc::channel(1).1,
        }
    }

    /// Like [`stream_chat`](Self::stream_chat), but `None` when the stream
    /// could not be started, so callers can tell that apart from an empty
    /// answer.
    pub async fn start_stream(&self, query: &str) -> Option<mpsc::Receiver<String>> {
        let question = sanitize(query);
        let mut history = self.history.clone().lock_owned().await;
        let turns = history.messages();

        let mut upstream = match self.engines.chat.stream(&turns, &question).await {
            Ok(upstream) => upstream,
            Err(e) => {
                error!(session = %self.id, kind = %e.kind(), error = %e, "Streaming chat failed to start");
                if let Err(e) = history.clear() {
                    warn!(session = %self.id, error = %e, "Failed to reset history");
                }
                return None;
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let id = self.id.clone();
        tokio::spawn(async move {
            let mut answer = String::new();

            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(chunk) => {
                        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                            answer.push_str(&text);
                            if tx.send(text).await.is_err() {
                                debug!(session = %id, "Stream receiver dropped, turn discarded");
                                return;
                            }
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(session = %id, kind = %e.kind(), error = %e, "Stream interrupted, turn discarded");
                        return;
                    }
                }
            }

            record_turn(&mut **history, &id, &question, &answer);
        });

        Some(rx)
    }

    /// Clear the history. `false` if the store refused.
    pub async fn reset(&self) -> bool {
        match self.history.lock().await.clear() {
            Ok(()) => {
                info!(session = %self.id, "History reset");
                true
            }
            Err(e) => {
                error!(session = %self.id, error = %e, "History reset failed");
                false
            }
        }
    }

    /// Snapshot of the stored turns, oldest first.
    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.messages()
    }
}

fn record_turn(history: &mut dyn ChatStore, id: &SessionId, question: &str, answer: &str) {
    let result = history
        .put(Message::user(question))
        .and_then(|()| history.put(Message::assistant(answer)));
    if let Err(e) = result {
        warn!(session = %id, error = %e, "Failed to record turn");
    }
}
