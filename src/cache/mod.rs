mod error;
mod keys;
mod redis;
mod service;

pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use redis::{RedisStore, SearchHit, pack_f32_le};
pub use service::{CacheEntry, CacheService, INDEX_NAME, RedisCacheService};
