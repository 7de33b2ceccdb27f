//! Error types for the ragdesk domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external collaborator has its own error enum, and every failure can be
//! classified into an [`ErrorKind`] so the session layer can apply a policy
//! per kind instead of one catch-all.

use thiserror::Error;

/// What the engines return: a failure of one of the two collaborators.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion / embedding service errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Vector store errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),
}

impl Error {
    /// Classify this error for logging and degrade decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Provider(e) => e.kind(),
            Error::Retrieval(e) => e.kind(),
        }
    }
}

/// Coarse classification of a failure at an adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    ContentFiltered,
    Auth,
    Network,
    Api,
    Retrieval,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ContentFiltered => "content_filtered",
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Blocked by content filter: {0}")]
    ContentFiltered(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::ContentFiltered(_) => ErrorKind::ContentFiltered,
            ProviderError::AuthenticationFailed(_) => ErrorKind::Auth,
            ProviderError::Network(_) | ProviderError::StreamInterrupted(_) => ErrorKind::Network,
            ProviderError::ApiError { .. } | ProviderError::ModelNotFound(_) => ErrorKind::Api,
            ProviderError::NotConfigured(_) => ErrorKind::Unknown,
        }
    }

    /// Map a `reqwest`-style transport failure description to a variant.
    pub fn from_transport(message: impl Into<String>, timed_out: bool) -> Self {
        if timed_out {
            ProviderError::Timeout(message.into())
        } else {
            ProviderError::Network(message.into())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Vector store connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Upsert failed: {0}")]
    Storage(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] ProviderError),
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Embedding(e) => e.kind(),
            _ => ErrorKind::Retrieval,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("History storage failed: {0}")]
    Storage(String),
}
