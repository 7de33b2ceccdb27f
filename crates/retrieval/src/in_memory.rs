//! In-memory store: useful for testing and `serve --in-memory` runs.

use async_trait::async_trait;
use ragdesk_core::error::RetrievalError;
use ragdesk_core::knowledge::{ContextSnippet, DocumentChunk, KnowledgeStore, rank};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::embedding::Embedder;
use crate::vector;

struct StoredChunk {
    chunk: DocumentChunk,
    embedding: Vec<f32>,
}

/// A store that keeps embedded chunks in a Vec and ranks them by cosine
/// similarity. Upserting an existing chunk id replaces it.
pub struct InMemoryStore {
    embedder: Embedder,
    entries: Arc<RwLock<Vec<StoredChunk>>>,
}

impl InMemoryStore {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
        let query_embedding = self.embedder.embed_query(query).await?;
        let entries = self.entries.read().await;

        let hits = vector::top_k(
            entries.iter().map(|e| e.embedding.as_slice()),
            &query_embedding,
            top_k,
        );

        let mut snippets: Vec<ContextSnippet> = hits
            .into_iter()
            .map(|(i, score)| ContextSnippet {
                text: entries[i].chunk.text.clone(),
                source_id: entries[i].chunk.source_id.clone(),
                relevance_rank: 0,
                score,
            })
            .collect();
        rank(&mut snippets);

        Ok(snippets)
    }

    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, RetrievalError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        let mut entries = self.entries.write().await;
        let written = chunks.len();
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            entries.retain(|e| e.chunk.id != chunk.id);
            entries.push(StoredChunk { chunk, embedding });
        }
        Ok(written)
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.entries.read().await.len())
    }
}
