//! Cache collaborator seam and scope registry.
//!
//! Two storage scopes exist: *shared* (one logical store for chain-agnostic
//! data such as the shard directory) and *sharded* (one logical store per
//! chain id, holding chain-specific detail and pending-tx data). Components
//! never pick a backend directly; they name a scope and `CacheScopes`
//! resolves the instance.
//!
//! `MemoryCache` is the built-in backend: DashMap entries with an `Instant`
//! expiry, bounded by entry count with a clear-half eviction sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{IndexError, Result};
use crate::types::ChainId;

/// Which logical cache store a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Chain-agnostic data: shard directory, chain registry.
    Shared,
    /// Chain-specific entity detail and pending-tx data.
    Sharded(ChainId),
}

#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Batch get; keys with no live entry are absent from the result.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Per-scope backend registry, passed by constructor injection.
pub struct CacheScopes {
    shared: Arc<dyn CacheBackend>,
    sharded: DashMap<ChainId, Arc<dyn CacheBackend>>,
}

impl CacheScopes {
    pub fn new(shared: Arc<dyn CacheBackend>) -> Self {
        Self {
            shared,
            sharded: DashMap::new(),
        }
    }

    /// Register the backend instance serving one chain's sharded scope.
    pub fn register_chain(&self, chain_id: ChainId, backend: Arc<dyn CacheBackend>) {
        self.sharded.insert(chain_id, backend);
    }

    pub fn backend(&self, scope: CacheScope) -> Result<Arc<dyn CacheBackend>> {
        match scope {
            CacheScope::Shared => Ok(Arc::clone(&self.shared)),
            CacheScope::Sharded(chain_id) => self
                .sharded
                .get(&chain_id)
                .map(|b| Arc::clone(&b))
                .ok_or_else(|| {
                    IndexError::validation(
                        "chain_id",
                        format!("no sharded cache registered for chain {chain_id}"),
                    )
                }),
        }
    }
}

const DEFAULT_MAX_ENTRIES: usize = 65_536;

/// In-memory TTL cache for tests and local runs.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, (Vec<u8>, Instant)>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => Some(entry.0.clone()),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    // Simple eviction: drop expired entries first, then clear half if still
    // over capacity. O(n), happens rarely, avoids LRU bookkeeping.
    fn evict_if_full(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
        if self.entries.len() >= self.max_entries {
            let doomed: Vec<String> = self
                .entries
                .iter()
                .take(self.max_entries / 2)
                .map(|e| e.key().clone())
                .collect();
            for key in doomed {
                self.entries.remove(&key);
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.live(key) {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.evict_if_full();
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
