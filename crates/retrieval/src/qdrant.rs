//! Qdrant-backed knowledge store.
//!
//! Requires a running Qdrant instance (gRPC, default port 6334).
//! Points written by `ragdesk ingest` carry `text`, `source` and
//! `chunk_index` payload fields. Collections built by llama-index pipelines
//! are read too: their text lives in the `_node_content` JSON string and the
//! source in `file_path` / `file_name`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use ragdesk_config::QdrantConfig;
use ragdesk_core::error::RetrievalError;
use ragdesk_core::knowledge::{ContextSnippet, DocumentChunk, KnowledgeStore, rank};
use tracing::{debug, info};

use crate::embedding::Embedder;

pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    embedder: Embedder,
}

impl QdrantStore {
    /// Build a client for the configured instance. No request is sent yet.
    pub fn connect(config: &QdrantConfig, embedder: Embedder) -> Result<Self, RetrievalError> {
        let client = Qdrant::from_url(&config.url())
            .api_key(config.api_key.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
            embedder,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection if missing, sized from a probe embedding.
    pub async fn ensure_collection(&self) -> Result<(), RetrievalError> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if exists {
            return Ok(());
        }

        let dimension = self.embedder.embed_query("dimension probe").await?.len();
        info!(collection = %self.collection, dimension, "Creating Qdrant collection");

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| RetrievalError::Storage(e.to_string()))?;

        Ok(())
    }

    fn create_point(chunk: &DocumentChunk, embedding: Vec<f32>) -> PointStruct {
        let payload: HashMap<String, Value> = HashMap::from([
            ("text".to_string(), Value::from(chunk.text.clone())),
            ("source".to_string(), Value::from(chunk.source_id.clone())),
            ("chunk_index".to_string(), Value::from(chunk.chunk_index as i64)),
        ]);

        PointStruct::new(PointId::from(chunk.id.clone()), embedding, payload)
    }
}

/// Pull `(text, source)` out of a point payload, in either layout.
fn extract_snippet(payload: &HashMap<String, Value>) -> Option<(String, String)> {
    let text = match payload.get("text").and_then(|v| v.as_str()) {
        Some(text) => text.clone(),
        None => {
            let node = payload.get("_node_content")?.as_str()?;
            let node: serde_json::Value = serde_json::from_str(node).ok()?;
            node.get("text")?.as_str()?.to_string()
        }
    };

    let source = ["source", "file_path", "file_name"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    Some((text, source))
}

#[async_trait]
impl KnowledgeStore for QdrantStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
        let query_embedding = self.embedder.embed_query(query).await?;

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query_embedding, top_k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| RetrievalError::QueryFailed(e.to_string()))?;

        let mut snippets: Vec<ContextSnippet> = results
            .result
            .iter()
            .filter_map(|point| {
                let (text, source_id) = extract_snippet(&point.payload)?;
                Some(ContextSnippet {
                    text,
                    source_id,
                    relevance_rank: 0,
                    score: point.score,
                })
            })
            .collect();
        rank(&mut snippets);

        debug!(collection = %self.collection, hits = snippets.len(), top_k, "Qdrant search");
        Ok(snippets)
    }

    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, RetrievalError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| Self::create_point(chunk, embedding))
            .collect();
        let written = points.len();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| RetrievalError::Storage(e.to_string()))?;

        debug!(collection = %self.collection, written, "Upserted chunks into Qdrant");
        Ok(written)
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| RetrievalError::QueryFailed(e.to_string()))?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}
