//! Knowledge store trait: the vector database seen from the service.
//!
//! The running service only ever searches. Ingestion (`ragdesk ingest`)
//! upserts pre-chunked documents. Embedding of queries and chunks is the
//! store's concern, so callers work in plain text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::RetrievalError;

/// A retrieved passage, ranked for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// The passage text
    pub text: String,

    /// Source document identifier (usually a file path)
    pub source_id: String,

    /// 1-based position in the result list, 1 = most relevant
    pub relevance_rank: usize,

    /// Raw similarity score reported by the store
    #[serde(default)]
    pub score: f32,
}

/// A unit of ingestion: one chunk of one source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Stable chunk identifier (UUID string)
    pub id: String,

    /// Chunk text
    pub text: String,

    /// Source document identifier
    pub source_id: String,

    /// Position of the chunk within its source
    pub chunk_index: usize,
}

/// The core KnowledgeStore trait.
///
/// Implementations: Qdrant, in-memory (tests and local runs).
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// The backend name (e.g., "qdrant", "in_memory").
    fn name(&self) -> &str;

    /// Return up to `top_k` snippets ordered by descending relevance.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<ContextSnippet>, RetrievalError>;

    /// Embed and store chunks. Returns how many were written.
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> std::result::Result<usize, RetrievalError>;

    /// Number of stored chunks.
    async fn count(&self) -> std::result::Result<usize, RetrievalError>;

    /// Can we reach the store?
    async fn health_check(&self) -> bool {
        true
    }
}

/// Assign 1-based ranks in the order given.
pub fn rank(snippets: &mut [ContextSnippet]) {
    for (i, snippet) in snippets.iter_mut().enumerate() {
        snippet.relevance_rank = i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(text: &str) -> ContextSnippet {
        ContextSnippet {
            text: text.into(),
            source_id: "data/handbook.md".into(),
            relevance_rank: 0,
            score: 0.5,
        }
    }

    #[test]
    fn rank_is_one_based() {
        let mut snippets = vec![snippet("a"), snippet("b"), snippet("c")];
        rank(&mut snippets);
        let ranks: Vec<usize> = snippets.iter().map(|s| s.relevance_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn snippet_serialization() {
        let json = serde_json::to_string(&snippet("Opening hours")).unwrap();
        assert!(json.contains("Opening hours"));
        assert!(json.contains("handbook.md"));
    }
}
