//! Redis Stack adapter: JSON documents plus RediSearch vector queries.
//!
//! Wraps a standalone Redis client and exposes the handful of commands
//! the cache service needs. Commands are issued raw with `redis::cmd`
//! because JSON.* and FT.* are module commands without typed bindings;
//! replies are parsed from `redis::Value`.

use redis::{Value, aio::MultiplexedConnection};

use super::error::{CacheError, CacheResult};

/// Field name the KNN clause binds the vector distance to.
const VECTOR_SCORE_FIELD: &str = "__vector_score";

/// A single hit from a vector search, already converted to similarity
/// space (`1 - cosine_distance`, higher is closer).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub key: String,
    pub similarity: f64,
    /// Full JSON document (`$` return field), when present.
    pub document: Option<String>,
}

pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Round-trip a PING to verify connectivity.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn is_healthy(&self) -> bool {
        self.ping().await.is_ok()
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    /// JSON.GET at the given path. Returns `None` for a missing key.
    pub async fn json_get(&self, key: &str, path: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .arg(path)
            .query_async(&mut conn)
            .await?;
        Ok(data)
    }

    /// JSON.SET with a pre-serialized document. Atomic at key granularity.
    pub async fn json_set(&self, key: &str, path: &str, raw_json: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("JSON.SET")
            .arg(key)
            .arg(path)
            .arg(raw_json)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, secs: u64) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Top-k nearest-neighbour search against the HNSW index.
    ///
    /// Binds `$vec` to the raw little-endian float32 layout of the query
    /// vector and sorts by vector score ascending (smallest cosine
    /// distance first). The full JSON root is requested back.
    pub async fn knn_search(
        &self,
        index: &str,
        k: usize,
        vector: &[f32],
    ) -> CacheResult<Vec<SearchHit>> {
        let mut conn = self.connection().await?;
        let query = format!("*=>[KNN {k} @embedding $vec AS {VECTOR_SCORE_FIELD}]");

        let reply: Value = redis::cmd("FT.SEARCH")
            .arg(index)
            .arg(&query)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(pack_f32_le(vector))
            .arg("RETURN")
            .arg(1)
            .arg("$")
            .arg("SORTBY")
            .arg(VECTOR_SCORE_FIELD)
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await?;

        Ok(parse_search_reply(reply))
    }

    /// Idempotently create the HNSW vector index over `cache:`-prefixed
    /// JSON documents. An already-existing index is not an error.
    pub async fn create_vector_index(&self, name: &str, dimensions: usize) -> CacheResult<()> {
        let mut conn = self.connection().await?;

        // FT.INFO succeeds iff the index exists.
        let probe: Result<Value, redis::RedisError> =
            redis::cmd("FT.INFO").arg(name).query_async(&mut conn).await;
        if probe.is_ok() {
            tracing::info!(index = %name, "vector index already exists");
            return Ok(());
        }

        let created: Result<(), redis::RedisError> = redis::cmd("FT.CREATE")
            .arg(name)
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(super::keys::CACHE_KEY_PREFIX)
            .arg("SCHEMA")
            .arg("$.query_hash")
            .arg("AS")
            .arg("query_hash")
            .arg("TAG")
            .arg("$.embedding")
            .arg("AS")
            .arg("embedding")
            .arg("VECTOR")
            .arg("HNSW")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(dimensions)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                tracing::info!(index = %name, dimensions, "created vector index");
                Ok(())
            }
            Err(e) if e.to_string().contains("Index already exists") => {
                tracing::info!(index = %name, "vector index already exists");
                Ok(())
            }
            Err(e) => Err(CacheError::IndexBootstrap(e.to_string())),
        }
    }

    /// Delete every key matching `prefix*`, paging with SCAN. Returns the
    /// number of keys removed.
    pub async fn scan_and_delete(&self, prefix: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                for key in &keys {
                    del.arg(key);
                }
                let removed: u64 = del.query_async(&mut conn).await?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }
}

/// Pack a float slice as raw little-endian IEEE-754 bytes, the layout the
/// FT.SEARCH PARAMS binding expects. The conversion is explicit so the
/// result is identical on big-endian hosts.
pub fn pack_f32_le(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

/// Parse an FT.SEARCH reply.
///
/// The RESP2 shape is `[total, key1, [field, value, ...], key2, ...]`.
/// Distances are converted to similarity (`1 - distance`) here so every
/// higher layer reasons in similarity space.
fn parse_search_reply(reply: Value) -> Vec<SearchHit> {
    let Value::Array(items) = reply else {
        return Vec::new();
    };

    let mut iter = items.into_iter();
    let total = match iter.next() {
        Some(Value::Int(n)) => n,
        _ => return Vec::new(),
    };
    if total == 0 {
        return Vec::new();
    }

    let mut hits = Vec::new();
    while let Some(key_value) = iter.next() {
        let key = match as_string(&key_value) {
            Some(k) => k,
            None => continue,
        };

        let mut similarity = 0.0;
        let mut document = None;
        if let Some(Value::Array(fields)) = iter.next() {
            let mut fields = fields.into_iter();
            while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
                match as_string(&name).as_deref() {
                    Some(VECTOR_SCORE_FIELD) => {
                        if let Some(distance) =
                            as_string(&value).and_then(|s| s.parse::<f64>().ok())
                        {
                            similarity = 1.0 - distance;
                        }
                    }
                    Some("$") => {
                        document = as_string(&value);
                    }
                    _ => {}
                }
            }
        }

        hits.push(SearchHit {
            key,
            similarity,
            document,
        });
    }

    hits
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}
