//! Wiring: config → providers, knowledge store, prompt composer.
//!
//! Everything here is built once per process and shared through `Arc`s.

use std::path::Path;
use std::sync::Arc;

use ragdesk_agent::{InstructionPolicy, PromptComposer, PromptError, SessionFactory};
use ragdesk_config::AppConfig;
use ragdesk_core::error::{ProviderError, RetrievalError};
use ragdesk_core::knowledge::KnowledgeStore;
use ragdesk_providers::Providers;
use ragdesk_retrieval::{Chunker, Embedder, InMemoryStore, IngestError, QdrantStore, ingest_dir};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Which knowledge store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnowledgeBackend {
    #[default]
    Qdrant,
    /// Process-local store, filled from `ingest.data_dir` at startup.
    InMemory,
}

/// The shared collaborators every session uses.
#[derive(Clone)]
pub struct Services {
    pub providers: Providers,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub composer: Arc<PromptComposer>,
}

impl Services {
    pub async fn build(config: &AppConfig, backend: KnowledgeBackend) -> Result<Self, BootstrapError> {
        let providers = ragdesk_providers::build_from_config(config)?;
        let composer = PromptComposer::shared(InstructionPolicy::from_config(&config.prompt)?);
        let embedder = Embedder::new(providers.embedding.clone(), config.embedding.model.clone())
            .with_batch_size(config.embedding.batch_size);

        let knowledge: Arc<dyn KnowledgeStore> = match backend {
            KnowledgeBackend::Qdrant => {
                let store = QdrantStore::connect(&config.qdrant, embedder)?;
                info!(url = %config.qdrant.url(), collection = store.collection(), "Using Qdrant knowledge store");
                Arc::new(store)
            }
            KnowledgeBackend::InMemory => {
                let store = InMemoryStore::new(embedder);
                preload(&store, config).await?;
                Arc::new(store)
            }
        };

        info!(
            completion = providers.completion.name(),
            embedding = providers.embedding.name(),
            model = %config.completion.model,
            "Services ready"
        );

        Ok(Self {
            providers,
            knowledge,
            composer,
        })
    }

    pub fn session_factory(&self, config: &AppConfig) -> SessionFactory {
        SessionFactory::new(
            self.providers.completion.clone(),
            self.knowledge.clone(),
            self.composer.clone(),
            config,
        )
    }
}

async fn preload(store: &InMemoryStore, config: &AppConfig) -> Result<(), BootstrapError> {
    let dir = Path::new(&config.ingest.data_dir);
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Data directory missing, in-memory store starts empty");
        return Ok(());
    }

    let chunker = Chunker::new(config.ingest.chunk_size, config.ingest.chunk_overlap);
    let report = ingest_dir(dir, store, &chunker, config.embedding.batch_size).await?;
    info!(
        files = report.files,
        chunks = report.chunks,
        skipped = report.skipped,
        "Preloaded in-memory store"
    );
    Ok(())
}
