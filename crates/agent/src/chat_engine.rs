//! Condense-plus-context chat engine for the conversational path.
//!
//! # Flow
//!
//! 1. Condense history + follow-up into a standalone question
//! 2. Retrieve snippets for the standalone question
//! 3. Send [system(context + instructions)] + history + user message
//!
//! The engine is stateless; the session owns the history and records turns.

use std::sync::Arc;

use ragdesk_core::error::Error;
use ragdesk_core::knowledge::KnowledgeStore;
use ragdesk_core::message::Message;
use ragdesk_core::provider::{ChunkReceiver, Provider, ProviderRequest};
use tracing::debug;

use crate::prompt::{PromptComposer, context_str};

/// Sampling settings shared by both engines.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationSettings {
    pub fn from_config(config: &ragdesk_config::CompletionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub(crate) fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

pub struct ChatEngine {
    provider: Arc<dyn Provider>,
    store: Arc<dyn KnowledgeStore>,
    composer: Arc<PromptComposer>,
    settings: GenerationSettings,
    top_k: usize,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn KnowledgeStore>,
        composer: Arc<PromptComposer>,
        settings: GenerationSettings,
        top_k: usize,
    ) -> Self {
        Self {
            provider,
            store,
            composer,
            settings,
            top_k,
        }
    }

    /// Rewrite `question` as a standalone question. Returns it unchanged
    /// when there is no history or the model answers with nothing.
    pub async fn condense(&self, history: &[Message], question: &str) -> Result<String, Error> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = self.composer.condense(history, question);
        let response = self
            .provider
            .complete(self.settings.request(vec![Message::user(prompt)]))
            .await?;

        let condensed = response.message.content.trim();
        if condensed.is_empty() {
            return Ok(question.to_string());
        }

        debug!(condensed = %condensed, "Condensed follow-up question");
        Ok(condensed.to_string())
    }

    /// Condense, retrieve and assemble the full message list.
    async fn prepare(&self, history: &[Message], question: &str) -> Result<Vec<Message>, Error> {
        let standalone = self.condense(history, question).await?;
        let snippets = self.store.search(&standalone, self.top_k).await?;

        debug!(
            store = self.store.name(),
            snippets = snippets.len(),
            top_k = self.top_k,
            "Retrieved context"
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.composer.conversational(&context_str(&snippets))));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(question));
        Ok(messages)
    }

    /// Answer `question` in the context of `history`.
    pub async fn chat(&self, history: &[Message], question: &str) -> Result<String, Error> {
        let messages = self.prepare(history, question).await?;
        let response = self.provider.complete(self.settings.request(messages)).await?;
        Ok(response.message.content)
    }

    /// Like `chat`, but streams the answer.
    pub async fn stream(&self, history: &[Message], question: &str) -> Result<ChunkReceiver, Error> {
        let messages = self.prepare(history, question).await?;
        let mut request = self.settings.request(messages);
        request.stream = true;
        Ok(self.provider.stream(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FnProvider, StaticStore, system_prompt};
    use ragdesk_core::error::ProviderError;
    use ragdesk_core::message::Role;

    fn engine(provider: FnProvider, store: StaticStore) -> ChatEngine {
        ChatEngine::new(
            Arc::new(provider),
            Arc::new(store),
            Arc::new(PromptComposer::default()),
            GenerationSettings {
                model: "mock-model".into(),
                temperature: 0.1,
                max_tokens: None,
            },
            20,
        )
    }

    #[tokio::test]
    async fn condense_skipped_without_history() {
        let provider = FnProvider::new(|_| panic!("provider must not be called"));
        let e = engine(provider, StaticStore::empty());
        assert_eq!(e.condense(&[], "hello").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn condense_uses_model_answer() {
        let provider = FnProvider::new(|req| {
            assert!(req.messages[0].content.contains("Standalone question:"));
            Ok("  Who is the CEO of the company?  ".into())
        });
        let e = engine(provider, StaticStore::empty());
        let history = vec![Message::user("Who runs it?"), Message::assistant("The CEO.")];
        assert_eq!(
            e.condense(&history, "who?").await.unwrap(),
            "Who is the CEO of the company?"
        );
    }

    #[tokio::test]
    async fn blank_condensation_falls_back_to_question() {
        let e = engine(FnProvider::new(|_| Ok("   ".into())), StaticStore::empty());
        let history = vec![Message::user("a"), Message::assistant("b")];
        assert_eq!(e.condense(&history, "q").await.unwrap(), "q");
    }

    #[tokio::test]
    async fn chat_sends_system_history_and_user() {
        let provider = FnProvider::new(|req| {
            if req.messages.len() == 1 {
                return Ok("standalone".into());
            }
            assert_eq!(req.messages.len(), 4);
            assert_eq!(req.messages[0].role, Role::System);
            assert!(req.messages[0].content.contains("source: data/hours.md"));
            assert!(req.messages[0].content.contains("Trains run 6am to 1am."));
            assert_eq!(req.messages[1].content, "earlier");
            assert_eq!(req.messages[3].role, Role::User);
            assert_eq!(req.messages[3].content, "when?");
            Ok("6am to 1am".into())
        });
        let store = StaticStore::with(&[("Trains run 6am to 1am.", "data/hours.md")]);
        let e = engine(provider, store.clone());
        let history = vec![Message::user("earlier"), Message::assistant("reply")];

        assert_eq!(e.chat(&history, "when?").await.unwrap(), "6am to 1am");
        assert_eq!(store.queries(), vec![("standalone".to_string(), 20)]);
    }

    #[tokio::test]
    async fn retrieval_failure_propagates() {
        let e = engine(FnProvider::new(|_| Ok("x".into())), StaticStore::failing());
        let err = e.chat(&[], "q").await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[tokio::test]
    async fn provider_failure_keeps_kind() {
        let e = engine(
            FnProvider::new(|_| Err(ProviderError::Timeout("slow".into()))),
            StaticStore::empty(),
        );
        let err = e.chat(&[], "q").await.unwrap_err();
        assert_eq!(err.kind(), ragdesk_core::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn stream_yields_answer() {
        let provider = FnProvider::new(|req| {
            assert!(system_prompt(req).is_some());
            Ok("streamed".into())
        });
        let e = engine(provider, StaticStore::empty());
        let mut rx = e.stream(&[], "q").await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("streamed"));
    }
}
