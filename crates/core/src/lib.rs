//! # ragdesk Core
//!
//! Domain types, traits, and error definitions for the ragdesk RAG chat
//! service. This crate has **zero framework dependencies**: it defines the
//! domain model that every adapter implements against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators (the completion/embedding service and the
//! vector store) are defined as traits here. Implementations live in
//! `ragdesk-providers` and `ragdesk-retrieval`, which lets the session logic
//! be tested against in-process mocks.

pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, HistoryError, ProviderError, RetrievalError};
pub use knowledge::{ContextSnippet, DocumentChunk, KnowledgeStore};
pub use message::{Message, Role, SessionId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
