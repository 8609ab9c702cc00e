//! Fingerprint-keyed result cache with per-entry TTL

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::CacheConfig;

/// A cached output with its creation time and lifetime
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Counters describing cache behavior since construction
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    /// Expired entries removed lazily on read
    pub evictions: u64,
    /// Unexpired entries currently held
    pub entries: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    insertions: u64,
    evictions: u64,
}

/// Result cache keyed by operation name and canonicalized parameters.
///
/// Expiry is judged lazily: an entry past its TTL is removed the next time
/// it is read, and counts as a miss. Writes are last-writer-wins.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            default_ttl: config.default_ttl,
        }
    }

    /// Cache key for an operation invocation. Object keys are sorted
    /// recursively before hashing so that logically equal parameter maps
    /// produce the same key; array order stays significant.
    pub fn fingerprint(operation: &str, parameters: &Value) -> String {
        let canonical = canonicalize(parameters);
        let payload = serde_json::to_string(&canonical).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update(b"\0");
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a previously cached output.
    pub async fn get(&self, operation: &str, parameters: &Value) -> Option<Value> {
        let key = Self::fingerprint(operation, parameters);
        let mut inner = self.inner.lock().await;

        let found = inner
            .entries
            .get(&key)
            .map(|entry| (entry.is_expired(), entry.value.clone()));

        match found {
            Some((true, _)) => {
                inner.entries.remove(&key);
                inner.evictions += 1;
                inner.misses += 1;
                None
            }
            Some((false, value)) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store an output. `ttl` overrides the configured default lifetime.
    pub async fn put(
        &self,
        operation: &str,
        parameters: &Value,
        value: &Value,
        ttl: Option<Duration>,
    ) {
        let key = Self::fingerprint(operation, parameters);
        let entry = CacheEntry::new(value.clone(), ttl.unwrap_or(self.default_ttl));

        let mut inner = self.inner.lock().await;
        inner.entries.insert(key, entry);
        inner.insertions += 1;
    }

    /// Drop the entry for one invocation. Returns whether one was present.
    pub async fn invalidate(&self, operation: &str, parameters: &Value) -> bool {
        let key = Self::fingerprint(operation, parameters);
        let mut inner = self.inner.lock().await;
        inner.entries.remove(&key).is_some()
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            insertions: inner.insertions,
            evictions: inner.evictions,
            entries: inner
                .entries
                .values()
                .filter(|entry| !entry.is_expired())
                .count(),
        }
    }
}

/// Rebuilds a value with all object keys sorted, recursively.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = serde_json::Map::new();
            for (key, item) in entries {
                sorted.insert(key.clone(), canonicalize(item));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
