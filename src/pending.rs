//! Pending-transaction reconciliation.
//!
//! Transactions submitted through the platform are recorded off-chain under
//! a UUID before confirmation. When confirmed receipts arrive, the
//! reconciler overlays the pending payload (business metadata attached at
//! submission time) with the confirmed fields; confirmed always wins on a
//! key collision, pending-only fields survive.
//!
//! Per-call flow: look up pending pointers by hash, short-circuit when none
//! resolve, fetch full payloads by uuid, merge. Pending data lives in the
//! per-chain sharded scope with a 3-day TTL; records are expected to confirm
//! or be discarded within that window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::TxHash;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CacheScope, CacheScopes};
use crate::cache_aside::{BatchCacheSource, BatchKeyCache};
use crate::error::Result;
use crate::store::{tables, ItemKey, TableStore};
use crate::types::{ChainId, PendingTxPointer, CACHE_PREFIX};

pub const PENDING_TX_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Resolves transaction hashes to the off-chain identity recorded at
/// submission time.
pub struct PendingByHashSource {
    store: Arc<dyn TableStore>,
    chain_id: ChainId,
}

#[async_trait]
impl BatchCacheSource for PendingByHashSource {
    type Key = TxHash;
    type Value = PendingTxPointer;

    fn cache_key(&self, key: &TxHash) -> String {
        format!("{CACHE_PREFIX}pth_{}_{key:#x}", self.chain_id)
    }

    fn ttl(&self) -> Duration {
        PENDING_TX_TTL
    }

    fn scope(&self) -> CacheScope {
        CacheScope::Sharded(self.chain_id)
    }

    async fn fetch_from_source(
        &self,
        missing: &[TxHash],
    ) -> Result<HashMap<TxHash, PendingTxPointer>> {
        let keys: Vec<ItemKey> = missing
            .iter()
            .map(|h| ItemKey::hash_only(format!("{h:#x}")))
            .collect();
        let found = self
            .store
            .batch_get(&tables::pending_transactions_by_hash(self.chain_id), &keys)
            .await?;

        let mut resolved = HashMap::new();
        for hash in missing {
            let key = ItemKey::hash_only(format!("{hash:#x}"));
            if let Some(item) = found.get(&key) {
                if let Ok(pointer) =
                    serde_json::from_value::<PendingTxPointer>(Value::Object(item.clone()))
                {
                    resolved.insert(*hash, pointer);
                }
            }
        }
        Ok(resolved)
    }
}

/// Resolves uuids to the full pending payload.
pub struct PendingByUuidSource {
    store: Arc<dyn TableStore>,
    chain_id: ChainId,
}

#[async_trait]
impl BatchCacheSource for PendingByUuidSource {
    type Key = Uuid;
    type Value = Value;

    fn cache_key(&self, key: &Uuid) -> String {
        format!("{CACHE_PREFIX}ptu_{}_{key}", self.chain_id)
    }

    fn ttl(&self) -> Duration {
        PENDING_TX_TTL
    }

    fn scope(&self) -> CacheScope {
        CacheScope::Sharded(self.chain_id)
    }

    async fn fetch_from_source(&self, missing: &[Uuid]) -> Result<HashMap<Uuid, Value>> {
        let keys: Vec<ItemKey> = missing
            .iter()
            .map(|u| ItemKey::hash_only(u.to_string()))
            .collect();
        let found = self
            .store
            .batch_get(&tables::pending_transactions(self.chain_id), &keys)
            .await?;

        let mut resolved = HashMap::new();
        for uuid in missing {
            let key = ItemKey::hash_only(uuid.to_string());
            if let Some(item) = found.get(&key) {
                resolved.insert(*uuid, Value::Object(item.clone()));
            }
        }
        Ok(resolved)
    }
}

pub struct PendingTxReconciler {
    by_hash: BatchKeyCache<PendingByHashSource>,
    by_uuid: BatchKeyCache<PendingByUuidSource>,
}

impl PendingTxReconciler {
    pub fn new(store: Arc<dyn TableStore>, scopes: Arc<CacheScopes>, chain_id: ChainId) -> Self {
        Self {
            by_hash: BatchKeyCache::new(
                Arc::clone(&scopes),
                PendingByHashSource {
                    store: Arc::clone(&store),
                    chain_id,
                },
            ),
            by_uuid: BatchKeyCache::new(
                scopes,
                PendingByUuidSource { store, chain_id },
            ),
        }
    }

    /// Overlay pending payloads onto confirmed receipts. The input map is
    /// returned unchanged when no hash has a pending record; an empty input
    /// returns an empty map without touching the cache.
    pub async fn reconcile(
        &self,
        receipts: HashMap<TxHash, Value>,
    ) -> Result<HashMap<TxHash, Value>> {
        if receipts.is_empty() {
            return Ok(HashMap::new());
        }

        let hashes: Vec<TxHash> = receipts.keys().copied().collect();
        let pointers = self.by_hash.fetch(&hashes).await?;
        if pointers.is_empty() {
            return Ok(receipts);
        }

        let uuids: Vec<Uuid> = pointers.values().map(|p| p.transaction_uuid).collect();
        let payloads = self.by_uuid.fetch(&uuids).await?;
        debug!(
            pending = pointers.len(),
            payloads = payloads.len(),
            "overlaying pending transaction data"
        );

        Ok(receipts
            .into_iter()
            .map(|(hash, confirmed)| {
                let pending = pointers
                    .get(&hash)
                    .and_then(|p| payloads.get(&p.transaction_uuid));
                (hash, overlay(pending, confirmed))
            })
            .collect())
    }
}

// Confirmed fields win on collision; pending-only fields survive.
fn overlay(pending: Option<&Value>, confirmed: Value) -> Value {
    match (pending, confirmed) {
        (Some(Value::Object(pending)), Value::Object(confirmed)) => {
            let mut merged = pending.clone();
            merged.extend(confirmed);
            Value::Object(merged)
        }
        (_, confirmed) => confirmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, MemoryCache};
    use crate::store::{Item, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHAIN: ChainId = 2000;

    /// Wrapper counting backend reads, to pin the no-cache-traffic fast path.
    #[derive(Debug)]
    struct CountingCache {
        inner: MemoryCache,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for CountingCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_many(keys).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<CountingCache>, PendingTxReconciler) {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingCache {
            inner: MemoryCache::with_defaults(),
            reads: AtomicUsize::new(0),
        });
        let scopes = Arc::new(CacheScopes::new(Arc::new(MemoryCache::with_defaults())));
        scopes.register_chain(CHAIN, counting.clone() as Arc<dyn CacheBackend>);
        let reconciler =
            PendingTxReconciler::new(store.clone() as Arc<dyn TableStore>, scopes, CHAIN);
        (store, counting, reconciler)
    }

    async fn seed_pending(store: &MemoryStore, hash: TxHash, uuid: Uuid, payload: Value) {
        let pointer: Item = json!({
            "transaction_uuid": uuid,
            "transaction_hash": format!("{hash:#x}"),
        })
        .as_object()
        .unwrap()
        .clone();
        store
            .put(
                &tables::pending_transactions_by_hash(CHAIN),
                ItemKey::hash_only(format!("{hash:#x}")),
                pointer,
            )
            .await
            .unwrap();
        store
            .put(
                &tables::pending_transactions(CHAIN),
                ItemKey::hash_only(uuid.to_string()),
                payload.as_object().unwrap().clone(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_cache_calls() {
        let (_store, cache, reconciler) = setup();
        let result = reconciler.reconcile(HashMap::new()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(cache.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_pending_records_returns_input_unchanged() {
        let (_store, _cache, reconciler) = setup();
        let hash = TxHash::with_last_byte(1);
        let mut receipts = HashMap::new();
        receipts.insert(hash, json!({"status": "1", "gasPrice": "7"}));

        let result = reconciler.reconcile(receipts.clone()).await.unwrap();
        assert_eq!(result, receipts);
    }

    #[tokio::test]
    async fn test_confirmed_fields_win_pending_only_fields_survive() {
        let (store, _cache, reconciler) = setup();
        let hash = TxHash::with_last_byte(2);
        let uuid = Uuid::new_v4();
        seed_pending(
            &store,
            hash,
            uuid,
            json!({
                "transaction_uuid": uuid,
                "gasPrice": "5",
                "metaProperty": "submitted-via-api",
            }),
        )
        .await;

        let mut receipts = HashMap::new();
        receipts.insert(hash, json!({"gasPrice": "7", "status": "1"}));

        let result = reconciler.reconcile(receipts).await.unwrap();
        let merged = &result[&hash];
        assert_eq!(merged["gasPrice"], json!("7"), "confirmed wins");
        assert_eq!(merged["status"], json!("1"));
        assert_eq!(
            merged["metaProperty"],
            json!("submitted-via-api"),
            "pending-only field survives"
        );
    }

    #[tokio::test]
    async fn test_mixed_batch_overlays_only_pending_hashes() {
        let (store, _cache, reconciler) = setup();
        let pending_hash = TxHash::with_last_byte(3);
        let plain_hash = TxHash::with_last_byte(4);
        let uuid = Uuid::new_v4();
        seed_pending(
            &store,
            pending_hash,
            uuid,
            json!({"transaction_uuid": uuid, "note": "mine"}),
        )
        .await;

        let mut receipts = HashMap::new();
        receipts.insert(pending_hash, json!({"status": "1"}));
        receipts.insert(plain_hash, json!({"status": "0"}));

        let result = reconciler.reconcile(receipts).await.unwrap();
        assert_eq!(result[&pending_hash]["note"], json!("mine"));
        assert_eq!(result[&plain_hash], json!({"status": "0"}));
    }
}
