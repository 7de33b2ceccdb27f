//! Provider router: builds the completion and embedding providers from config.

use std::sync::Arc;

use ragdesk_config::AppConfig;
use ragdesk_core::error::ProviderError;
use ragdesk_core::provider::Provider;

use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// The two collaborators the chat service needs.
#[derive(Clone)]
pub struct Providers {
    pub completion: Arc<dyn Provider>,
    pub embedding: Arc<dyn Provider>,
}

/// Build providers from configuration.
///
/// The embedding provider shares the completion provider's instance when
/// both name the same backend with the same key and endpoint.
pub fn build_from_config(config: &AppConfig) -> Result<Providers, ProviderError> {
    let completion = build_provider(
        &config.completion.provider,
        config.completion.api_key.clone(),
        config.completion.api_url.clone(),
        config,
    )?;

    let embedding_key = config.embedding_api_key();
    let embedding_url = config
        .embedding
        .api_url
        .clone()
        .or_else(|| config.completion.api_url.clone());
    let shares_backend = config.embedding_provider() == config.completion.provider
        && embedding_key == config.completion.api_key
        && embedding_url == config.completion.api_url;

    let embedding = if shares_backend {
        completion.clone()
    } else {
        build_provider(config.embedding_provider(), embedding_key, embedding_url, config)?
    };

    Ok(Providers {
        completion,
        embedding,
    })
}

fn build_provider(
    name: &str,
    api_key: Option<String>,
    api_url: Option<String>,
    config: &AppConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let timeout = config.completion.request_timeout_secs;

    if name == "gemini" {
        let api_key = api_key.ok_or_else(|| {
            ProviderError::NotConfigured(
                "Gemini API key not found. Set GOOGLE_API_KEY or completion.api_key".into(),
            )
        })?;
        let mut provider = GeminiProvider::new(api_key, timeout)?
            .with_safety_threshold(&config.completion.safety_threshold);
        if let Some(url) = api_url {
            provider = provider.with_base_url(url);
        }
        return Ok(Arc::new(provider));
    }

    let base_url = match api_url.or_else(|| default_base_url(name)) {
        Some(url) => url,
        None => {
            return Err(ProviderError::NotConfigured(format!(
                "Unknown provider '{name}': set an api_url"
            )));
        }
    };

    Ok(Arc::new(OpenAiCompatProvider::new(
        name,
        base_url,
        api_key.unwrap_or_default(),
        timeout,
    )?))
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "vllm" => "http://localhost:8000/v1",
        _ => return None,
    };
    Some(url.into())
}
