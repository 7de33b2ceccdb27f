//! Offline ingestion: directory → chunks → embeddings → knowledge store.

use std::path::{Path, PathBuf};

use ragdesk_core::error::RetrievalError;
use ragdesk_core::knowledge::{DocumentChunk, KnowledgeStore};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunker::Chunker;

const SUPPORTED_EXTENSIONS: [&str; 8] = ["txt", "md", "markdown", "rst", "html", "htm", "csv", "json"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

/// What one ingestion run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
}

/// Ingest every supported file under `dir`.
///
/// Unreadable or non-UTF-8 files are skipped with a warning. Store errors
/// abort the run. Chunks are upserted `batch_size` at a time.
pub async fn ingest_dir(
    dir: &Path,
    store: &dyn KnowledgeStore,
    chunker: &Chunker,
    batch_size: usize,
) -> Result<IngestReport, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::NotADirectory(dir.to_path_buf()));
    }

    let mut report = IngestReport::default();
    let mut pending: Vec<DocumentChunk> = Vec::new();
    let batch_size = batch_size.max(1);

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_supported(p))
        .collect();
    files.sort();

    for path in files {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping file");
                report.skipped += 1;
                continue;
            }
        };

        let source_id = path.display().to_string();
        let pieces = chunker.split(&content);
        info!(source = %source_id, chunks = pieces.len(), "Chunked file");

        report.files += 1;
        pending.extend(pieces.into_iter().enumerate().map(|(chunk_index, text)| DocumentChunk {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            source_id: source_id.clone(),
            chunk_index,
        }));

        while pending.len() >= batch_size {
            let batch: Vec<DocumentChunk> = pending.drain(..batch_size).collect();
            report.chunks += store.upsert(batch).await?;
        }
    }

    if !pending.is_empty() {
        report.chunks += store.upsert(pending).await?;
    }

    Ok(report)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
