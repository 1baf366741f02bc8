//! Cache-aside read-through templates.
//!
//! A concrete cache supplies a capability source (key derivation, TTL, scope,
//! value codec, authoritative fetch) and gets the read-through/write-back
//! machinery from one of two templates:
//!
//! - `SingleKeyCache`: one deterministic key, one value.
//! - `BatchKeyCache`: many natural keys of one entity kind per lookup; only
//!   cache misses hit the authoritative source, and write-back happens in
//!   detached per-key tasks.
//!
//! Cache failures never fail a read. A backend read error is a miss, an
//! undecodable entry is a miss, and write-back errors are logged and
//! swallowed. Only the authoritative source can fail a fetch.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheBackend, CacheScope, CacheScopes};
use crate::error::{IndexError, Result};

/// Capabilities a single-key cache must supply.
#[async_trait]
pub trait SingleCacheSource: Send + Sync {
    type Value: Serialize + DeserializeOwned + Send + Sync;

    /// Deterministic key; a pure function of the source's construction params.
    fn cache_key(&self) -> String;

    fn ttl(&self) -> Duration;

    fn scope(&self) -> CacheScope;

    /// Authoritative read. Hard failures propagate to the caller.
    async fn fetch_from_source(&self) -> Result<Self::Value>;

    fn encode_value(value: &Self::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| IndexError::CacheWrite(e.to_string()))
    }

    /// `None` is treated as a miss and the source re-fetched.
    fn decode_value(bytes: &[u8]) -> Option<Self::Value> {
        serde_json::from_slice(bytes).ok()
    }
}

pub struct SingleKeyCache<S: SingleCacheSource> {
    scopes: Arc<CacheScopes>,
    source: S,
}

impl<S: SingleCacheSource> SingleKeyCache<S> {
    pub fn new(scopes: Arc<CacheScopes>, source: S) -> Self {
        Self { scopes, source }
    }

    pub async fn fetch(&self) -> Result<S::Value> {
        let backend = self.scopes.backend(self.source.scope())?;
        let key = self.source.cache_key();

        match backend.get(&key).await {
            Ok(Some(bytes)) => match S::decode_value(&bytes) {
                Some(value) => return Ok(value),
                None => debug!(key, "undecodable cache entry, refetching"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "cache read failed, falling through to source"),
        }

        let value = self.source.fetch_from_source().await?;

        match S::encode_value(&value) {
            Ok(bytes) => {
                if let Err(e) = backend.set(&key, bytes, self.source.ttl()).await {
                    warn!(key, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(key, error = %e, "cache encode failed"),
        }

        Ok(value)
    }

    /// Forces the next read to refetch. Used by writers after a mutation.
    pub async fn clear(&self) {
        let Ok(backend) = self.scopes.backend(self.source.scope()) else {
            return;
        };
        let key = self.source.cache_key();
        if let Err(e) = backend.delete(&key).await {
            warn!(key, error = %e, "cache invalidation failed");
        }
    }
}

/// Capabilities a batch cache must supply.
#[async_trait]
pub trait BatchCacheSource: Send + Sync {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    type Value: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Deterministic per-natural-key cache key.
    fn cache_key(&self, key: &Self::Key) -> String;

    fn ttl(&self) -> Duration;

    fn scope(&self) -> CacheScope;

    /// Authoritative read resolving only the cache-miss subset. Natural keys
    /// with no record are absent from the returned map.
    async fn fetch_from_source(
        &self,
        missing: &[Self::Key],
    ) -> Result<HashMap<Self::Key, Self::Value>>;

    fn encode_value(value: &Self::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| IndexError::CacheWrite(e.to_string()))
    }

    fn decode_value(bytes: &[u8]) -> Option<Self::Value> {
        serde_json::from_slice(bytes).ok()
    }
}

pub struct BatchKeyCache<S: BatchCacheSource> {
    scopes: Arc<CacheScopes>,
    source: S,
}

impl<S: BatchCacheSource> BatchKeyCache<S> {
    pub fn new(scopes: Arc<CacheScopes>, source: S) -> Self {
        Self { scopes, source }
    }

    /// Resolve every requested natural key, reading the cache first and the
    /// authoritative source for the misses. Keys found nowhere are omitted
    /// from the result; callers treat "absent" as "does not exist".
    pub async fn fetch(&self, keys: &[S::Key]) -> Result<HashMap<S::Key, S::Value>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let backend = self.scopes.backend(self.source.scope())?;

        // Forward map cache-key -> natural key; also dedups the request.
        let mut forward: HashMap<String, S::Key> = HashMap::with_capacity(keys.len());
        for key in keys {
            forward.insert(self.source.cache_key(key), key.clone());
        }
        let cache_keys: Vec<String> = forward.keys().cloned().collect();

        let hits = match backend.get_many(&cache_keys).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "batch cache read failed, resolving all keys from source");
                HashMap::new()
            }
        };

        let mut resolved: HashMap<S::Key, S::Value> = HashMap::with_capacity(forward.len());
        let mut missing: Vec<S::Key> = Vec::new();
        for (cache_key, natural) in &forward {
            match hits.get(cache_key).and_then(|bytes| S::decode_value(bytes)) {
                Some(value) => {
                    resolved.insert(natural.clone(), value);
                }
                None => missing.push(natural.clone()),
            }
        }

        if !missing.is_empty() {
            let fetched = self.source.fetch_from_source(&missing).await?;
            self.write_back(&backend, &fetched);
            resolved.extend(fetched);
        }

        Ok(resolved)
    }

    // Fire-and-forget per-key write-back; individual failures only reach the
    // log sink, never the caller's result.
    fn write_back(&self, backend: &Arc<dyn CacheBackend>, fetched: &HashMap<S::Key, S::Value>) {
        let ttl = self.source.ttl();
        for (key, value) in fetched {
            let bytes = match S::encode_value(value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "cache encode failed");
                    continue;
                }
            };
            let cache_key = self.source.cache_key(key);
            let backend = Arc::clone(backend);
            tokio::spawn(async move {
                if let Err(e) = backend.set(&cache_key, bytes, ttl).await {
                    warn!(key = cache_key, error = %e, "cache write failed");
                }
            });
        }
    }
}
