use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Invalid cache entry: {0}")]
    InvalidEntry(&'static str),

    #[error("Invalid cache entry: embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Embedding cannot be empty")]
    EmptyEmbedding,

    #[error("Vector index bootstrap failed: {0}")]
    IndexBootstrap(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
