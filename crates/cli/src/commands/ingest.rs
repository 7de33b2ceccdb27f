//! `ragdesk ingest`: chunk, embed and upload a document directory.

use std::path::PathBuf;

use ragdesk_config::AppConfig;
use ragdesk_core::knowledge::KnowledgeStore;
use ragdesk_retrieval::{Chunker, Embedder, QdrantStore, ingest_dir};

pub async fn run(config: AppConfig, dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let dir = dir.unwrap_or_else(|| PathBuf::from(&config.ingest.data_dir));

    let providers = ragdesk_providers::build_from_config(&config)?;
    let embedder = Embedder::new(providers.embedding, config.embedding.model.clone())
        .with_batch_size(config.embedding.batch_size);
    let store = QdrantStore::connect(&config.qdrant, embedder)?;
    store.ensure_collection().await?;

    println!("ragdesk ingest");
    println!("   Source:     {}", dir.display());
    println!("   Collection: {} at {}", store.collection(), config.qdrant.url());
    println!(
        "   Chunking:   {} tokens, {} overlap",
        config.ingest.chunk_size, config.ingest.chunk_overlap
    );

    let chunker = Chunker::new(config.ingest.chunk_size, config.ingest.chunk_overlap);
    let report = ingest_dir(&dir, &store, &chunker, config.embedding.batch_size).await?;

    println!();
    println!("  Files ingested: {}", report.files);
    println!("  Chunks written: {}", report.chunks);
    if report.skipped > 0 {
        println!("  Files skipped:  {} (see log)", report.skipped);
    }
    println!("  Collection now holds {} points", store.count().await?);

    Ok(())
}
