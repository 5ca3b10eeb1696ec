//! Cache service: exact-match lookup, vector similarity search, and
//! write-behind persistence over the Redis store adapter.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;

use super::{
    error::{CacheError, CacheResult},
    keys::{CACHE_KEY_PREFIX, CacheKeys},
    redis::{RedisStore, SearchHit},
};

/// Name of the RediSearch index covering cache entries.
pub const INDEX_NAME: &str = "cache_idx";

/// Deadline for the index bootstrap at construction.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for a single write-behind task. Detached from the request
/// lifetime: the cache must still be populated after the client response
/// has been sent.
const WRITE_BEHIND_TIMEOUT: Duration = Duration::from_secs(10);

/// A cached LLM response together with the query that produced it.
///
/// `llm_response` holds the exact upstream body bytes as a JSON string,
/// so a cache hit replays the original response byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub id: String,
    pub query_hash: String,
    pub user_query: String,
    pub embedding: Vec<f32>,
    pub llm_response: String,
    #[serde(default)]
    pub created_at: i64,
}

/// The three cache operations the pipeline controller consumes, plus the
/// administrative clear. Implemented by [`RedisCacheService`] in
/// production and by fakes in tests.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Look up an entry by query fingerprint. `Ok(None)` is a miss, not
    /// an error.
    async fn check_exact_match(&self, query_hash: &str) -> CacheResult<Option<CacheEntry>>;

    /// Top-1 vector search. Returns the best neighbour only when its
    /// similarity is strictly greater than `threshold`; the observed
    /// similarity is reported either way (`0.0` when the index is empty).
    async fn search_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
    ) -> CacheResult<(Option<CacheEntry>, f64)>;

    /// Enqueue a write and return immediately. Failures are logged, never
    /// surfaced to the caller.
    fn store_async(&self, entry: CacheEntry);

    /// Remove every cache entry. Returns the number of keys deleted.
    async fn clear(&self) -> CacheResult<u64>;
}

pub struct RedisCacheService {
    store: Arc<RedisStore>,
    /// Expected embedding length; entries with any other length are
    /// rejected before insertion.
    dimensions: usize,
    ttl: Option<Duration>,
    tracker: TaskTracker,
}

impl RedisCacheService {
    /// Build the service and bootstrap the vector index.
    ///
    /// An already-existing index is benign; any other bootstrap failure
    /// aborts construction.
    pub async fn new(
        store: Arc<RedisStore>,
        dimensions: usize,
        ttl: Option<Duration>,
        tracker: TaskTracker,
    ) -> CacheResult<Self> {
        tokio::time::timeout(
            BOOTSTRAP_TIMEOUT,
            store.create_vector_index(INDEX_NAME, dimensions),
        )
        .await
        .map_err(|_| CacheError::IndexBootstrap("timed out creating vector index".to_string()))??;

        Ok(Self {
            store,
            dimensions,
            ttl,
            tracker,
        })
    }

    async fn store_entry(
        store: &RedisStore,
        ttl: Option<Duration>,
        dimensions: usize,
        mut entry: CacheEntry,
    ) -> CacheResult<()> {
        validate_entry(&entry, dimensions)?;

        if entry.id.is_empty() {
            entry.id = CacheKeys::entry_key(&entry.query_hash);
        }
        if entry.created_at == 0 {
            entry.created_at = chrono::Utc::now().timestamp();
        }

        let raw = serde_json::to_string(&entry)?;
        store.json_set(&entry.id, "$", &raw).await?;

        if let Some(ttl) = ttl {
            store.expire(&entry.id, ttl.as_secs()).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl CacheService for RedisCacheService {
    async fn check_exact_match(&self, query_hash: &str) -> CacheResult<Option<CacheEntry>> {
        let key = CacheKeys::entry_key(query_hash);

        if !self.store.exists(&key).await? {
            return Ok(None);
        }

        let Some(data) = self.store.json_get(&key, "$").await? else {
            return Ok(None);
        };

        // JSON.GET with the `$` path wraps the document in an array.
        let mut entries: Vec<CacheEntry> = serde_json::from_str(&data)?;
        Ok(if entries.is_empty() {
            None
        } else {
            Some(entries.remove(0))
        })
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
    ) -> CacheResult<(Option<CacheEntry>, f64)> {
        if embedding.is_empty() {
            return Err(CacheError::EmptyEmbedding);
        }

        let hits = self.store.knn_search(INDEX_NAME, 1, embedding).await?;

        let Some(best) = best_above_threshold(&hits, threshold) else {
            let similarity = hits.first().map(|h| h.similarity).unwrap_or(0.0);
            if !hits.is_empty() {
                tracing::info!(similarity, threshold, "vector search below threshold");
            }
            return Ok((None, similarity));
        };

        let similarity = best.similarity;
        let Some(document) = best.document.as_deref() else {
            return Ok((None, similarity));
        };

        // KNN documents come back array-wrapped like JSON.GET $.
        let mut entries: Vec<CacheEntry> = serde_json::from_str(document)?;
        if entries.is_empty() {
            return Ok((None, similarity));
        }

        tracing::info!(
            similarity,
            threshold,
            cache_key = %best.key,
            "vector search hit"
        );
        Ok((Some(entries.remove(0)), similarity))
    }

    fn store_async(&self, entry: CacheEntry) {
        let store = self.store.clone();
        let ttl = self.ttl;
        let dimensions = self.dimensions;

        self.tracker.spawn(async move {
            let cache_key = if entry.id.is_empty() {
                CacheKeys::entry_key(&entry.query_hash)
            } else {
                entry.id.clone()
            };
            let query_hash = entry.query_hash.clone();

            let result = tokio::time::timeout(
                WRITE_BEHIND_TIMEOUT,
                Self::store_entry(&store, ttl, dimensions, entry),
            )
            .await;

            match result {
                Ok(Ok(())) => {
                    tracing::info!(cache_key = %cache_key, query_hash = %query_hash, "cache entry stored");
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        error = %e,
                        cache_key = %cache_key,
                        query_hash = %query_hash,
                        "async cache write failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        cache_key = %cache_key,
                        query_hash = %query_hash,
                        "async cache write timed out"
                    );
                }
            }
        });
    }

    async fn clear(&self) -> CacheResult<u64> {
        self.store.scan_and_delete(CACHE_KEY_PREFIX).await
    }
}

/// Select the best hit iff its similarity strictly exceeds the threshold.
/// Equality is a miss: borderline neighbours must not pollute responses.
fn best_above_threshold<'a>(hits: &'a [SearchHit], threshold: f64) -> Option<&'a SearchHit> {
    hits.first().filter(|hit| hit.similarity > threshold)
}

/// Reject entries missing any required field, or carrying an embedding
/// of the wrong length, before they reach the store. The HNSW index is
/// declared with a fixed dimension; a mismatched vector must never be
/// inserted under it.
fn validate_entry(entry: &CacheEntry, dimensions: usize) -> CacheResult<()> {
    if entry.query_hash.is_empty() {
        return Err(CacheError::InvalidEntry("query_hash is required"));
    }
    if entry.user_query.is_empty() {
        return Err(CacheError::InvalidEntry("user_query is required"));
    }
    if entry.embedding.is_empty() {
        return Err(CacheError::InvalidEntry("embedding is required"));
    }
    if entry.embedding.len() != dimensions {
        return Err(CacheError::Dimension {
            expected: dimensions,
            actual: entry.embedding.len(),
        });
    }
    if entry.llm_response.is_empty() {
        return Err(CacheError::InvalidEntry("llm_response is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(similarity: f64) -> SearchHit {
        SearchHit {
            key: "cache:x".to_string(),
            similarity,
            document: None,
        }
    }

    fn entry() -> CacheEntry {
        CacheEntry {
            id: String::new(),
            query_hash: "sha256:abc".to_string(),
            user_query: "q".to_string(),
            embedding: vec![0.1, 0.2],
            llm_response: r#"{"id":"resp-1"}"#.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn similarity_above_threshold_is_a_hit() {
        let hits = [hit(0.96)];
        assert!(best_above_threshold(&hits, 0.95).is_some());
    }

    #[test]
    fn similarity_equal_to_threshold_is_a_miss() {
        let hits = [hit(0.95)];
        assert!(best_above_threshold(&hits, 0.95).is_none());
    }

    #[test]
    fn similarity_below_threshold_is_a_miss() {
        let hits = [hit(0.90)];
        assert!(best_above_threshold(&hits, 0.95).is_none());
    }

    #[test]
    fn no_hits_is_a_miss() {
        assert!(best_above_threshold(&[], 0.95).is_none());
    }

    #[test]
    fn validate_accepts_complete_entry() {
        assert!(validate_entry(&entry(), 2).is_ok());
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut e = entry();
        e.query_hash.clear();
        assert!(validate_entry(&e, 2).is_err());

        let mut e = entry();
        e.user_query.clear();
        assert!(validate_entry(&e, 2).is_err());

        let mut e = entry();
        e.embedding.clear();
        assert!(validate_entry(&e, 2).is_err());

        let mut e = entry();
        e.llm_response.clear();
        assert!(validate_entry(&e, 2).is_err());
    }

    #[test]
    fn validate_rejects_wrong_embedding_length() {
        // entry() carries a 2-element vector; any other configured
        // dimension must be rejected at insertion.
        let e = entry();
        assert!(matches!(
            validate_entry(&e, 3),
            Err(CacheError::Dimension {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            validate_entry(&e, 1536),
            Err(CacheError::Dimension {
                expected: 1536,
                actual: 2
            })
        ));
    }

    #[test]
    fn entry_round_trips_through_json() {
        let mut e = entry();
        e.id = "cache:abc".to_string();
        e.created_at = 1_700_000_000;

        let raw = serde_json::to_string(&e).unwrap();
        let parsed: CacheEntry = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed.id, e.id);
        assert_eq!(parsed.query_hash, e.query_hash);
        assert_eq!(parsed.user_query, e.user_query);
        assert_eq!(parsed.embedding, e.embedding);
        assert_eq!(parsed.llm_response, e.llm_response);
        assert_eq!(parsed.created_at, e.created_at);
    }

    #[test]
    fn stored_response_preserves_exact_bytes() {
        // The upstream body is kept as a string, so unusual whitespace
        // and field ordering survive the round trip untouched.
        let body = "{\n  \"b\": 1,\t\"a\": 2 }";
        let mut e = entry();
        e.llm_response = body.to_string();

        let raw = serde_json::to_string(&e).unwrap();
        let parsed: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.llm_response, body);
    }
}
