//! Deterministic key derivation for cache entries.

use sha2::{Digest, Sha256};

/// Prefix carried by every query fingerprint.
pub const FINGERPRINT_PREFIX: &str = "sha256:";
/// Prefix shared by every cache entry key; the vector index is declared
/// over this prefix.
pub const CACHE_KEY_PREFIX: &str = "cache:";

pub struct CacheKeys;

impl CacheKeys {
    /// SHA-256 fingerprint of a query: `sha256:<64 lowercase hex>`.
    ///
    /// Pure and deterministic; equal inputs yield byte-equal output
    /// across processes.
    pub fn fingerprint(query: &str) -> String {
        let hash = Sha256::digest(query.as_bytes());
        format!("{}{:x}", FINGERPRINT_PREFIX, hash)
    }

    /// Store key for a fingerprint: `cache:<hex>`.
    ///
    /// Accepts fingerprints with or without the `sha256:` prefix.
    pub fn entry_key(fingerprint: &str) -> String {
        let hex = fingerprint
            .strip_prefix(FINGERPRINT_PREFIX)
            .unwrap_or(fingerprint);
        format!("{}{}", CACHE_KEY_PREFIX, hex)
    }
}
