//! Configuration for the gateway.
//!
//! All settings come from environment variables with sensible defaults,
//! so the binary can run with nothing but a reachable Redis Stack and an
//! embedding API key:
//!
//! ```sh
//! EMBEDDING_API_KEY=sk-... UPSTREAM_API_KEY=sk-... ./semantic-cache-gateway
//! ```

use std::time::Duration;

use thiserror::Error;

/// Default upstream base URL (OpenAI-compatible).
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1";
/// Default embedding endpoint.
pub const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1/embeddings";
/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
/// Default embedding vector length.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
/// Default Redis connection string.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
/// Default minimum cosine similarity for a semantic hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;
/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default per-entry TTL applied at write-behind time (24 hours).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;

/// Wall-clock budget for a single embedding call.
pub const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);
/// Wall-clock budget for a single upstream exchange.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be a valid integer")]
    InvalidInt(&'static str),

    #[error("{0} must be a valid float")]
    InvalidFloat(&'static str),

    #[error("PORT must be between 1 and 65535")]
    PortOutOfRange,

    #[error("SIMILARITY_THRESHOLD must be between 0.0 and 1.0")]
    ThresholdOutOfRange,

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Console log output format, selected via `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Runtime configuration, resolved once at bootstrap.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen port.
    pub port: u16,
    /// Base URL of the upstream LLM API.
    pub upstream_url: String,
    /// Server-side API key; overrides the client `Authorization` header
    /// on outbound upstream requests when set.
    pub upstream_api_key: Option<String>,
    /// Embedding API endpoint.
    pub embedding_url: String,
    /// Bearer token for the embedding endpoint.
    pub embedding_api_key: Option<String>,
    /// Embedding model name.
    pub embedding_model: String,
    /// Expected embedding vector length. Vectors of any other length are
    /// rejected before they reach the store.
    pub embedding_dimensions: usize,
    /// Redis Stack connection string.
    pub redis_url: String,
    /// Minimum cosine similarity for a semantic cache hit. A score equal
    /// to the threshold is a miss.
    pub similarity_threshold: f64,
    /// Per-entry TTL applied when a write-behind completes. Zero disables
    /// expiry.
    pub cache_ttl_secs: u64,
    /// Console log format.
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Tests pass a map-backed closure instead of mutating the process
    /// environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidInt("PORT"))?,
            None => u32::from(DEFAULT_PORT),
        };
        if port < 1 || port > 65_535 {
            return Err(ConfigError::PortOutOfRange);
        }

        let similarity_threshold = match get("SIMILARITY_THRESHOLD") {
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidFloat("SIMILARITY_THRESHOLD"))?,
            None => DEFAULT_SIMILARITY_THRESHOLD,
        };
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::ThresholdOutOfRange);
        }

        let embedding_dimensions = match get("EMBEDDING_DIMENSIONS") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidInt("EMBEDDING_DIMENSIONS"))?,
            None => DEFAULT_EMBEDDING_DIMENSIONS,
        };
        if embedding_dimensions == 0 {
            return Err(ConfigError::Empty("EMBEDDING_DIMENSIONS"));
        }

        let cache_ttl_secs = match get("CACHE_TTL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidInt("CACHE_TTL_SECS"))?,
            None => DEFAULT_CACHE_TTL_SECS,
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let config = Self {
            port: port as u16,
            upstream_url: get("UPSTREAM_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            upstream_api_key: get("UPSTREAM_API_KEY"),
            embedding_url: get("EMBEDDING_URL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
            embedding_api_key: get("EMBEDDING_API_KEY"),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions,
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            similarity_threshold,
            cache_ttl_secs,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_url.is_empty() {
            return Err(ConfigError::Empty("UPSTREAM_URL"));
        }
        if self.embedding_url.is_empty() {
            return Err(ConfigError::Empty("EMBEDDING_URL"));
        }
        if self.redis_url.is_empty() {
            return Err(ConfigError::Empty("REDIS_URL"));
        }
        Ok(())
    }

    /// Per-entry TTL as a `Duration`, or `None` when expiry is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}
