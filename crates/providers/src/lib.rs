//! Completion and embedding providers for ragdesk.
//!
//! All providers implement the `ragdesk_core::Provider` trait.
//! The router builds the completion and embedding providers from configuration.

pub mod gemini;
mod http;
pub mod openai_compat;
pub mod router;
mod sse;

pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{Providers, build_from_config};
