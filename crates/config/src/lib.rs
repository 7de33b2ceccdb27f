//! Configuration loading, validation, and management for ragdesk.
//!
//! Loads configuration from `~/.ragdesk/config.toml` with environment
//! variable overrides for credentials and endpoints. Validates all settings
//! at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragdesk/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion (LLM) service
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Embedding service
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store
    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// Conversation session behaviour
    #[serde(default)]
    pub session: SessionConfig,

    /// Instruction policy and prompt rendering
    #[serde(default)]
    pub prompt: PromptConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Offline ingestion
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// --- Completion ---

#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// "gemini" or the name of an OpenAI-compatible provider
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (required for unknown OpenAI-compatible providers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Block threshold applied to every harm category
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: String,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_completion_model() -> String {
    "gemini-1.5-flash-latest".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_request_timeout() -> u64 {
    360
}
fn default_safety_threshold() -> String {
    "BLOCK_ONLY_HIGH".into()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_completion_model(),
            api_key: None,
            api_url: None,
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout(),
            safety_threshold: default_safety_threshold(),
        }
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("safety_threshold", &self.safety_threshold)
            .finish()
    }
}

// --- Embedding ---

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Defaults to the completion provider when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Defaults to the completion key when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Texts per embedding request during ingestion
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-004".into()
}
fn default_embed_batch() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_embedding_model(),
            api_key: None,
            api_url: None,
            batch_size: default_embed_batch(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

// --- Qdrant ---

#[derive(Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_host")]
    pub host: String,

    /// gRPC port
    #[serde(default = "default_qdrant_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_qdrant_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub use_tls: bool,
}

fn default_qdrant_host() -> String {
    "localhost".into()
}
fn default_qdrant_port() -> u16 {
    6334
}
fn default_collection() -> String {
    "documents".into()
}
fn default_qdrant_timeout() -> u64 {
    60
}

impl QdrantConfig {
    /// The gRPC endpoint URL.
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            host: default_qdrant_host(),
            port: default_qdrant_port(),
            api_key: None,
            collection: default_collection(),
            timeout_secs: default_qdrant_timeout(),
            use_tls: false,
        }
    }
}

impl std::fmt::Debug for QdrantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &redact(&self.api_key))
            .field("collection", &self.collection)
            .field("timeout_secs", &self.timeout_secs)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

// --- Session ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Token budget for the chat history of one session
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,

    /// Snippets retrieved on the conversational path
    #[serde(default = "default_chat_top_k")]
    pub chat_top_k: usize,

    /// Snippets retrieved on the fallback path
    #[serde(default = "default_fallback_top_k")]
    pub fallback_top_k: usize,

    /// Tokens of context packed into one fallback completion call
    #[serde(default = "default_context_window")]
    pub context_window_tokens: usize,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_token_limit() -> usize {
    50_000
}
fn default_chat_top_k() -> usize {
    20
}
fn default_fallback_top_k() -> usize {
    3
}
fn default_context_window() -> usize {
    30_000
}
fn default_idle_timeout() -> u64 {
    3600
}
fn default_max_sessions() -> usize {
    1_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            chat_top_k: default_chat_top_k(),
            fallback_top_k: default_fallback_top_k(),
            context_window_tokens: default_context_window(),
            idle_timeout_secs: default_idle_timeout(),
            max_sessions: default_max_sessions(),
        }
    }
}

// --- Prompt ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Replace the built-in instruction policy with the contents of this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_file: Option<String>,

    /// Fixed offset used for the timestamp embedded in the instructions
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    /// Recompute the timestamp for every request instead of once at startup
    #[serde(default)]
    pub refresh_timestamp: bool,
}

fn default_utc_offset() -> i32 {
    8
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            instruction_file: None,
            utc_offset_hours: default_utc_offset(),
            refresh_timestamp: false,
        }
    }
}

// --- Gateway ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins. `["*"]` permits every origin, method and header.
    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: Vec<String>,

    /// Send one throwaway chat at startup so the first real request is warm
    #[serde(default)]
    pub warm_up: bool,

    /// Log request/response spans through `TraceLayer`
    #[serde(default = "default_true")]
    pub trace_requests: bool,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

impl GatewayConfig {
    pub fn cors_allows_any(&self) -> bool {
        self.cors_allow_origins.iter().any(|o| o == "*")
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_allow_origins: default_cors_origins(),
            warm_up: false,
            trace_requests: true,
        }
    }
}

// --- Ingest ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Chunk size in estimated tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in estimated tokens
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_data_dir() -> String {
    "./data".into()
}
fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    10
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragdesk/config.toml).
    ///
    /// Environment variables override the file:
    /// - `RAGDESK_API_KEY`, `GEMINI_API_KEY`, `GOOGLE_API_KEY` (first found wins)
    /// - `RAGDESK_MODEL`, `RAGDESK_EMBEDDING_MODEL`
    /// - `QDRANT_HOST`, `QDRANT_PORT`, `QDRANT_API_KEY`, `QDRANT_COLLECTION_NAME`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from an explicit path, then apply process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.completion.api_key.is_none() {
            self.completion.api_key = lookup("RAGDESK_API_KEY")
                .or_else(|| lookup("GEMINI_API_KEY"))
                .or_else(|| lookup("GOOGLE_API_KEY"));
        }

        if let Some(model) = lookup("RAGDESK_MODEL") {
            self.completion.model = model;
        }
        if let Some(model) = lookup("RAGDESK_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        if let Some(host) = lookup("QDRANT_HOST") {
            self.qdrant.host = host;
        }
        if let Some(port) = lookup("QDRANT_PORT") {
            self.qdrant.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("QDRANT_PORT is not a valid port: {port}"))
            })?;
        }
        if let Some(key) = lookup("QDRANT_API_KEY") {
            self.qdrant.api_key = Some(key);
        }
        if let Some(collection) = lookup("QDRANT_COLLECTION_NAME") {
            self.qdrant.collection = collection;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragdesk")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completion.temperature < 0.0 || self.completion.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "completion.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.session.chat_top_k == 0 || self.session.fallback_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "session.chat_top_k and session.fallback_top_k must be > 0".into(),
            ));
        }

        if self.session.token_limit == 0 {
            return Err(ConfigError::ValidationError(
                "session.token_limit must be > 0".into(),
            ));
        }

        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(ConfigError::ValidationError(
                "ingest.chunk_overlap must be smaller than ingest.chunk_size".into(),
            ));
        }

        if !(-12..=14).contains(&self.prompt.utc_offset_hours) {
            return Err(ConfigError::ValidationError(
                "prompt.utc_offset_hours must be between -12 and 14".into(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Key used for embeddings: explicit, else the completion key.
    pub fn embedding_api_key(&self) -> Option<String> {
        self.embedding
            .api_key
            .clone()
            .or_else(|| self.completion.api_key.clone())
    }

    /// Provider used for embeddings: explicit, else the completion provider.
    pub fn embedding_provider(&self) -> &str {
        self.embedding
            .provider
            .as_deref()
            .unwrap_or(&self.completion.provider)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
