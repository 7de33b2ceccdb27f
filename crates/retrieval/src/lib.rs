//! Knowledge stores and offline ingestion for ragdesk.
//!
//! All stores implement `ragdesk_core::KnowledgeStore`.
//! - `QdrantStore`: the production vector database
//! - `InMemoryStore`: cosine search over a `Vec`, for tests and local runs
//!
//! Ingestion walks a directory, chunks every text file and upserts the
//! chunks through whichever store is configured.

pub mod chunker;
pub mod embedding;
pub mod in_memory;
pub mod ingest;
pub mod qdrant;
pub mod vector;

pub use chunker::Chunker;
pub use embedding::Embedder;
pub use in_memory::InMemoryStore;
pub use ingest::{IngestError, IngestReport, ingest_dir};
pub use qdrant::QdrantStore;
