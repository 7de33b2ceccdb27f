//! Mock collaborators for router and registry tests.

use std::sync::Arc;

use async_trait::async_trait;
use ragdesk_agent::{PromptComposer, SessionFactory};
use ragdesk_config::AppConfig;
use ragdesk_core::error::{ProviderError, RetrievalError};
use ragdesk_core::knowledge::{ContextSnippet, DocumentChunk, KnowledgeStore};
use ragdesk_core::message::Message;
use ragdesk_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

pub enum Behaviour {
    Answer(String),
    Fail,
    Panic,
    /// Never answers.
    Stall,
}

pub struct MockProvider {
    behaviour: Behaviour,
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "gateway_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match &self.behaviour {
            Behaviour::Answer(text) => Ok(ProviderResponse {
                message: Message::assistant(text.clone()),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: request.model,
            }),
            Behaviour::Fail => Err(ProviderError::Network("connection refused".into())),
            Behaviour::Panic => panic!("mock provider exploded"),
            Behaviour::Stall => std::future::pending().await,
        }
    }
}

pub struct EmptyStore;

#[async_trait]
impl KnowledgeStore for EmptyStore {
    fn name(&self) -> &str {
        "empty"
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
        Ok(Vec::new())
    }

    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, RetrievalError> {
        Ok(chunks.len())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(0)
    }
}

pub fn factory_with(behaviour: Behaviour) -> SessionFactory {
    SessionFactory::new(
        Arc::new(MockProvider { behaviour }),
        Arc::new(EmptyStore),
        Arc::new(PromptComposer::default()),
        &AppConfig::default(),
    )
}

pub fn test_factory(answer: &str) -> SessionFactory {
    factory_with(Behaviour::Answer(answer.to_string()))
}
