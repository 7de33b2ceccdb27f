//! Single-turn query engine with tree summarization, used as the fallback path.
//!
//! Retrieved snippets are packed into groups that fit the context window.
//! Each group is answered independently (concurrently), then the partial
//! answers are packed and answered again until one answer remains.

use std::sync::Arc;

use futures::future::try_join_all;
use ragdesk_core::error::Error;
use ragdesk_core::knowledge::KnowledgeStore;
use ragdesk_core::message::Message;
use ragdesk_core::provider::Provider;
use ragdesk_core::token::{estimate_tokens, truncate_to_tokens};
use tracing::debug;

use crate::chat_engine::GenerationSettings;
use crate::prompt::{PromptComposer, format_snippet};

/// Tokens kept free for the instructions, the query and the answer.
const PROMPT_RESERVE_TOKENS: usize = 2_000;

pub struct QueryEngine {
    provider: Arc<dyn Provider>,
    store: Arc<dyn KnowledgeStore>,
    composer: Arc<PromptComposer>,
    settings: GenerationSettings,
    top_k: usize,
    context_window_tokens: usize,
}

impl QueryEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn KnowledgeStore>,
        composer: Arc<PromptComposer>,
        settings: GenerationSettings,
        top_k: usize,
        context_window_tokens: usize,
    ) -> Self {
        Self {
            provider,
            store,
            composer,
            settings,
            top_k,
            context_window_tokens,
        }
    }

    /// Retrieve and answer `question` without any history.
    pub async fn query(&self, question: &str) -> Result<String, Error> {
        let snippets = self.store.search(question, self.top_k).await?;
        debug!(
            store = self.store.name(),
            snippets = snippets.len(),
            top_k = self.top_k,
            "Fallback retrieval"
        );

        let texts = snippets.iter().map(format_snippet).collect();
        self.tree_summarize(question, texts).await
    }

    async fn tree_summarize(&self, question: &str, mut texts: Vec<String>) -> Result<String, Error> {
        let budget = self.group_budget(question);
        let mut previous_level: Option<usize> = None;

        loop {
            let groups = pack(&texts, budget);

            // Partial answers no longer pack tighter: one last pass over all of them
            if previous_level.is_some_and(|prev| groups.len() >= prev) {
                let merged = texts.join("\n\n");
                return self.answer(question, truncate_to_tokens(&merged, budget)).await;
            }

            let answers = try_join_all(groups.iter().map(|g| self.answer(question, g))).await?;
            debug!(groups = groups.len(), "Tree summarize level");

            if answers.len() == 1 {
                return Ok(answers.into_iter().next().unwrap_or_default());
            }

            previous_level = Some(groups.len());
            texts = answers;
        }
    }

    fn group_budget(&self, question: &str) -> usize {
        self.context_window_tokens
            .saturating_sub(PROMPT_RESERVE_TOKENS + estimate_tokens(question))
            .max(256)
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String, Error> {
        let prompt = self.composer.query(context, question);
        let response = self
            .provider
            .complete(self.settings.request(vec![Message::user(prompt)]))
            .await?;
        Ok(response.message.content)
    }
}

/// Greedily pack texts into groups of at most `budget` tokens, in order.
/// Oversized texts are truncated. Always returns at least one group.
fn pack(texts: &[String], budget: usize) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for text in texts {
        let text = truncate_to_tokens(text, budget);
        let tokens = estimate_tokens(text) + 1;

        if !current.is_empty() && current_tokens + tokens > budget {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(text);
        current_tokens += tokens;
    }

    if !current.is_empty() || groups.is_empty() {
        groups.push(current);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FnProvider, StaticStore};

    fn engine(provider: Arc<FnProvider>, store: StaticStore, window: usize) -> QueryEngine {
        QueryEngine::new(
            provider,
            Arc::new(store),
            Arc::new(PromptComposer::default()),
            GenerationSettings {
                model: "mock-model".into(),
                temperature: 0.1,
                max_tokens: None,
            },
            3,
            window,
        )
    }

    #[test]
    fn pack_keeps_order_and_budget() {
        let texts: Vec<String> = ["a".repeat(40), "b".repeat(40), "c".repeat(40)].into();
        // 11 tokens each with separator allowance; budget 25 fits two
        let groups = pack(&texts, 25);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].starts_with('a') && groups[0].ends_with('b'));
        assert_eq!(groups[1], "c".repeat(40));
    }

    #[test]
    fn pack_empty_yields_one_empty_group() {
        assert_eq!(pack(&[], 100), vec![String::new()]);
    }

    #[test]
    fn pack_truncates_oversized() {
        let groups = pack(&["x".repeat(1000)], 10);
        assert_eq!(groups, vec!["x".repeat(40)]);
    }

    #[tokio::test]
    async fn single_group_is_one_call() {
        let provider = Arc::new(FnProvider::new(|req| {
            let prompt = &req.messages[0].content;
            assert!(prompt.contains("source: data/fares.md"));
            assert!(prompt.contains("Query: how much?\nAnswer: "));
            Ok("HK$5".into())
        }));
        let store = StaticStore::with(&[("Fares start at HK$5.", "data/fares.md")]);
        let e = engine(provider.clone(), store.clone(), 30_000);

        assert_eq!(e.query("how much?").await.unwrap(), "HK$5");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(store.queries(), vec![("how much?".to_string(), 3)]);
    }

    #[tokio::test]
    async fn no_snippets_still_answers() {
        let provider = Arc::new(FnProvider::text("I could not find that."));
        let e = engine(provider.clone(), StaticStore::empty(), 30_000);
        assert_eq!(e.query("q").await.unwrap(), "I could not find that.");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn multiple_groups_are_summarized_again() {
        let provider = Arc::new(FnProvider::new(|req| {
            let prompt = &req.messages[0].content;
            if prompt.contains("partial") {
                Ok("final".into())
            } else {
                Ok("partial".into())
            }
        }));
        let big = "y".repeat(1000);
        let store = StaticStore::with(&[(big.as_str(), "a.md"), (big.as_str(), "b.md"), (big.as_str(), "c.md")]);
        // Budget floor of 256 tokens fits one snippet per group
        let e = engine(provider.clone(), store, 0);

        assert_eq!(e.query("q").await.unwrap(), "final");
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let provider = Arc::new(FnProvider::failing(
            ragdesk_core::error::ProviderError::RateLimited { retry_after_secs: 1 },
        ));
        let e = engine(provider, StaticStore::empty(), 30_000);
        let err = e.query("q").await.unwrap_err();
        assert_eq!(err.kind(), ragdesk_core::ErrorKind::RateLimited);
    }
}
