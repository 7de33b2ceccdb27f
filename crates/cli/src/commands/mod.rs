pub mod chat;
pub mod doctor;
pub mod ingest;
pub mod init;
pub mod serve;

use ragdesk_config::AppConfig;
use ragdesk_gateway::KnowledgeBackend;

pub(crate) fn backend(in_memory: bool) -> KnowledgeBackend {
    if in_memory {
        KnowledgeBackend::InMemory
    } else {
        KnowledgeBackend::Qdrant
    }
}

/// Fail early with setup hints when Gemini is selected without a key.
pub(crate) fn require_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.completion.api_key.is_some() || config.completion.provider != "gemini" {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    GOOGLE_API_KEY=...    (Gemini)");
    eprintln!("    GEMINI_API_KEY=...    (Gemini)");
    eprintln!("    RAGDESK_API_KEY=...   (any provider)");
    eprintln!();
    eprintln!("  Or add `completion.api_key` to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}
