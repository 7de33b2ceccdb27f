//! Conversation sessions for ragdesk.
//!
//! A request flows through:
//!
//! 1. **Sanitize** the raw user text
//! 2. **Chat engine**: condense history + question, retrieve, answer with history
//! 3. **Query engine** (on any failure of 2): retrieve, tree-summarize, no history
//! 4. **Apology** if both fail
//!
//! [`Session`] owns the history and applies that policy; the engines are
//! stateless and shared by every session a [`SessionFactory`] creates.

pub mod chat_engine;
pub mod chat_memory;
pub mod prompt;
pub mod query_engine;
pub mod sanitize;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use chat_engine::{ChatEngine, GenerationSettings};
pub use chat_memory::{ChatMemoryBuffer, ChatStore};
pub use prompt::{InstructionPolicy, PromptComposer, PromptError, PromptTemplate};
pub use query_engine::QueryEngine;
pub use sanitize::sanitize;
pub use session::{APOLOGY, Session, SessionFactory};
