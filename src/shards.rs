//! Shard directory and identifier resolution.
//!
//! Entity detail rows are horizontally sharded. The directory tracks which
//! shards exist and which accept *new* allocations; assignment of a natural
//! key (block number, transaction hash, economy/user address pair) to a
//! shard is write-once, so resolution results stay cacheable for hours.
//!
//! Callers that need a shard for a new write allocate one from the available
//! set (round-robin); they never infer one from the resolvers, which only
//! report assignments that already exist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{CacheScope, CacheScopes};
use crate::cache_aside::{BatchCacheSource, BatchKeyCache, SingleCacheSource, SingleKeyCache};
use crate::error::{IndexError, Result};
use crate::store::{tables, Item, ItemKey, QueryOptions, TableStore};
use crate::types::{hex_addr, ChainId, CACHE_PREFIX};

pub const AVAILABLE_SHARDS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Resolver TTLs track how hot each entity kind's detail data is, not the
// assignment's actual immutability.
pub const BLOCK_RESOLVER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const TRANSACTION_RESOLVER_TTL: Duration = Duration::from_secs(60 * 60);
pub const ECONOMY_ADDRESS_RESOLVER_TTL: Duration = Duration::from_secs(5 * 60);

/// Entity kinds with sharded detail stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Block,
    Transaction,
    EconomyAddress,
}

impl EntityKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Block => "bk",
            Self::Transaction => "tx",
            Self::EconomyAddress => "ea",
        }
    }

    /// Shard identifier for this kind on one chain, e.g. `ea_2000`.
    pub fn shard_identifier(self, chain_id: ChainId) -> String {
        format!("{}_{chain_id}", self.prefix())
    }
}

/// One physical shard of an entity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub identifier: String,
    pub shard_number: u32,
    pub is_available_for_allocation: bool,
}

impl ShardRecord {
    fn to_item(&self) -> Item {
        let value = serde_json::to_value(self).expect("shard record serializes");
        value.as_object().expect("shard record is an object").clone()
    }

    fn from_item(item: &Item) -> Option<Self> {
        serde_json::from_value(serde_json::Value::Object(item.clone())).ok()
    }
}

/// Resolved physical location of an entity's rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardLocation {
    pub identifier: String,
    pub shard_number: u32,
}

/// The (economy, user) pair that keys address-level assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EconomyUserPair {
    pub economy: Address,
    pub user: Address,
}

impl EconomyUserPair {
    fn natural_key(&self) -> String {
        format!("{}_{}", hex_addr(&self.economy), hex_addr(&self.user))
    }
}

fn assignment_partition(kind: EntityKind, chain_id: ChainId, natural: &str) -> String {
    format!("{}_{chain_id}_{natural}", kind.prefix())
}

fn sort_key_for_shard(shard_number: u32) -> String {
    format!("{shard_number:05}")
}

struct AvailableShardsSource {
    store: Arc<dyn TableStore>,
    identifier: String,
}

#[async_trait]
impl SingleCacheSource for AvailableShardsSource {
    type Value = Vec<ShardRecord>;

    fn cache_key(&self) -> String {
        format!("{CACHE_PREFIX}avs_{}", self.identifier)
    }

    fn ttl(&self) -> Duration {
        AVAILABLE_SHARDS_TTL
    }

    fn scope(&self) -> CacheScope {
        CacheScope::Shared
    }

    async fn fetch_from_source(&self) -> Result<Vec<ShardRecord>> {
        let page = self
            .store
            .query(
                tables::SHARD_RECORDS,
                &self.identifier,
                QueryOptions {
                    ascending: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(page
            .items
            .iter()
            .filter_map(ShardRecord::from_item)
            .filter(|s| s.is_available_for_allocation)
            .collect())
    }
}

/// Assignment lookups share one source shape; the kind decides prefixing,
/// cache tag and TTL.
pub struct AssignmentSource<K> {
    store: Arc<dyn TableStore>,
    chain_id: ChainId,
    kind: EntityKind,
    tag: &'static str,
    ttl: Duration,
    natural: fn(&K) -> String,
}

impl<K> AssignmentSource<K> {
    fn partition(&self, key: &K) -> String {
        assignment_partition(self.kind, self.chain_id, &(self.natural)(key))
    }
}

#[async_trait]
impl<K> BatchCacheSource for AssignmentSource<K>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
{
    type Key = K;
    type Value = ShardLocation;

    fn cache_key(&self, key: &K) -> String {
        format!(
            "{CACHE_PREFIX}{}_{}_{}",
            self.tag,
            self.chain_id,
            (self.natural)(key)
        )
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn scope(&self) -> CacheScope {
        CacheScope::Shared
    }

    async fn fetch_from_source(&self, missing: &[K]) -> Result<HashMap<K, ShardLocation>> {
        let item_keys: Vec<ItemKey> = missing
            .iter()
            .map(|k| ItemKey::hash_only(self.partition(k)))
            .collect();
        let found = self
            .store
            .batch_get(tables::SHARD_ASSIGNMENTS, &item_keys)
            .await?;

        let mut resolved = HashMap::new();
        for key in missing {
            let item_key = ItemKey::hash_only(self.partition(key));
            if let Some(item) = found.get(&item_key) {
                let location: ShardLocation =
                    serde_json::from_value(serde_json::Value::Object(item.clone()))
                        .map_err(|e| IndexError::source(format!("bad assignment row: {e}")))?;
                resolved.insert(key.clone(), location);
            }
        }
        Ok(resolved)
    }
}

pub type BlockShardResolver = BatchKeyCache<AssignmentSource<u64>>;
pub type TransactionShardResolver = BatchKeyCache<AssignmentSource<TxHash>>;
pub type EconomyAddressShardResolver = BatchKeyCache<AssignmentSource<EconomyUserPair>>;

/// Registry of shard existence, availability and assignments.
pub struct ShardDirectory {
    store: Arc<dyn TableStore>,
    scopes: Arc<CacheScopes>,
    round_robin: AtomicUsize,
}

impl ShardDirectory {
    pub fn new(store: Arc<dyn TableStore>, scopes: Arc<CacheScopes>) -> Self {
        Self {
            store,
            scopes,
            round_robin: AtomicUsize::new(0),
        }
    }

    fn available_cache(&self, kind: EntityKind, chain_id: ChainId) -> SingleKeyCache<AvailableShardsSource> {
        SingleKeyCache::new(
            Arc::clone(&self.scopes),
            AvailableShardsSource {
                store: Arc::clone(&self.store),
                identifier: kind.shard_identifier(chain_id),
            },
        )
    }

    /// Shards currently accepting new allocations, cached 24h in the shared
    /// scope. Historical (unavailable) shards stay queryable but are not
    /// returned here.
    pub async fn available_shards(
        &self,
        kind: EntityKind,
        chain_id: ChainId,
    ) -> Result<Vec<ShardRecord>> {
        self.available_cache(kind, chain_id).fetch().await
    }

    /// Create or replace a shard record, then invalidate the availability
    /// cache so the next read refetches.
    pub async fn provision_shard(
        &self,
        kind: EntityKind,
        chain_id: ChainId,
        shard_number: u32,
        is_available_for_allocation: bool,
    ) -> Result<()> {
        let record = ShardRecord {
            identifier: kind.shard_identifier(chain_id),
            shard_number,
            is_available_for_allocation,
        };
        let key = ItemKey::with_sort(record.identifier.clone(), sort_key_for_shard(shard_number));
        self.store
            .put(tables::SHARD_RECORDS, key, record.to_item())
            .await?;

        info!(
            identifier = record.identifier,
            shard = shard_number,
            available = is_available_for_allocation,
            "provisioned shard"
        );
        self.available_cache(kind, chain_id).clear().await;
        Ok(())
    }

    /// Toggle whether a shard accepts new allocations. Existing assignments
    /// are never revoked.
    pub async fn set_shard_availability(
        &self,
        kind: EntityKind,
        chain_id: ChainId,
        shard_number: u32,
        is_available_for_allocation: bool,
    ) -> Result<()> {
        let identifier = kind.shard_identifier(chain_id);
        let key = ItemKey::with_sort(identifier.clone(), sort_key_for_shard(shard_number));
        let item = self
            .store
            .get(tables::SHARD_RECORDS, &key)
            .await?
            .ok_or_else(|| {
                IndexError::validation(
                    "shard_number",
                    format!("shard {identifier}/{shard_number} does not exist"),
                )
            })?;
        let mut record = ShardRecord::from_item(&item)
            .ok_or_else(|| IndexError::source("bad shard record"))?;
        record.is_available_for_allocation = is_available_for_allocation;
        self.store
            .put(tables::SHARD_RECORDS, key, record.to_item())
            .await?;

        self.available_cache(kind, chain_id).clear().await;
        Ok(())
    }

    /// Assign a shard to a natural key that has none yet, round-robin over
    /// the available set. Write-once: if an assignment already exists (or a
    /// concurrent allocation wins the race), the persisted one is returned.
    pub async fn allocate(
        &self,
        kind: EntityKind,
        chain_id: ChainId,
        natural_key: &str,
    ) -> Result<ShardLocation> {
        let partition = assignment_partition(kind, chain_id, natural_key);
        let key = ItemKey::hash_only(partition);

        if let Some(item) = self.store.get(tables::SHARD_ASSIGNMENTS, &key).await? {
            return location_from_item(&item);
        }

        let shards = self.available_shards(kind, chain_id).await?;
        if shards.is_empty() {
            return Err(IndexError::ShardNotFound(kind.shard_identifier(chain_id)));
        }
        let pick = &shards[self.round_robin.fetch_add(1, Ordering::Relaxed) % shards.len()];
        let location = ShardLocation {
            identifier: pick.identifier.clone(),
            shard_number: pick.shard_number,
        };

        let value = serde_json::to_value(&location).expect("location serializes");
        let item = value.as_object().expect("location is an object").clone();
        match self
            .store
            .put_if_absent(tables::SHARD_ASSIGNMENTS, key, item)
            .await?
        {
            Some(existing) => location_from_item(&existing),
            None => Ok(location),
        }
    }

    pub fn block_resolver(&self, chain_id: ChainId) -> BlockShardResolver {
        BatchKeyCache::new(
            Arc::clone(&self.scopes),
            AssignmentSource {
                store: Arc::clone(&self.store),
                chain_id,
                kind: EntityKind::Block,
                tag: "sbk",
                ttl: BLOCK_RESOLVER_TTL,
                natural: |n: &u64| n.to_string(),
            },
        )
    }

    pub fn transaction_resolver(&self, chain_id: ChainId) -> TransactionShardResolver {
        BatchKeyCache::new(
            Arc::clone(&self.scopes),
            AssignmentSource {
                store: Arc::clone(&self.store),
                chain_id,
                kind: EntityKind::Transaction,
                tag: "stx",
                ttl: TRANSACTION_RESOLVER_TTL,
                natural: |h: &TxHash| format!("{h:#x}"),
            },
        )
    }

    pub fn economy_address_resolver(&self, chain_id: ChainId) -> EconomyAddressShardResolver {
        BatchKeyCache::new(
            Arc::clone(&self.scopes),
            AssignmentSource {
                store: Arc::clone(&self.store),
                chain_id,
                kind: EntityKind::EconomyAddress,
                tag: "sea",
                ttl: ECONOMY_ADDRESS_RESOLVER_TTL,
                natural: EconomyUserPair::natural_key,
            },
        )
    }

    /// Allocate for an (economy, user) pair, the write path's common case.
    pub async fn allocate_economy_address(
        &self,
        chain_id: ChainId,
        pair: &EconomyUserPair,
    ) -> Result<ShardLocation> {
        self.allocate(EntityKind::EconomyAddress, chain_id, &pair.natural_key())
            .await
    }
}

fn location_from_item(item: &Item) -> Result<ShardLocation> {
    serde_json::from_value(serde_json::Value::Object(item.clone()))
        .map_err(|e| IndexError::source(format!("bad assignment row: {e}")))
}
