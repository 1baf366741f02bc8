//! Wide-column store seam.
//!
//! The indexing core consumes "get/put/query item in table T under key K"
//! without depending on a concrete backend. Items are attribute maps; every
//! table is keyed by a partition key plus an optional sort key, and range
//! queries hand back an opaque continuation token that callers pass forward
//! verbatim.
//!
//! `MemoryStore` is the built-in reference backend: a BTree per table, so
//! sort-key ranges and continuation paging behave like the real store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{IndexError, Result};

/// An item is a loosely-shaped attribute map.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Composite key addressing one item inside a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: Option<String>,
}

impl ItemKey {
    pub fn hash_only(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    pub fn with_sort(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

/// Options for a partition range scan.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Scan the sort-key range descending when false.
    pub ascending: bool,
    /// Opaque continuation token from a previous page's `last_evaluated_key`.
    pub exclusive_start_key: Option<String>,
    pub limit: Option<usize>,
}

/// One page of a range scan.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present when more items remain; pass back verbatim to page forward.
    pub last_evaluated_key: Option<String>,
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn get(&self, table: &str, key: &ItemKey) -> Result<Option<Item>>;

    /// Batch point-reads. Keys with no item are absent from the result map.
    async fn batch_get(&self, table: &str, keys: &[ItemKey]) -> Result<HashMap<ItemKey, Item>>;

    async fn put(&self, table: &str, key: ItemKey, item: Item) -> Result<()>;

    /// Put the item only if nothing exists under its key yet. Returns the
    /// previously stored item when the write was suppressed.
    async fn put_if_absent(&self, table: &str, key: ItemKey, item: Item) -> Result<Option<Item>>;

    /// Deterministic-key upsert of many rows; same keys converge to the same
    /// end state on re-runs.
    async fn batch_put(&self, table: &str, rows: Vec<(ItemKey, Item)>) -> Result<()>;

    async fn query(&self, table: &str, partition: &str, opts: QueryOptions) -> Result<QueryPage>;
}

/// Table names for the store layout.
///
/// - `shard_records`: partition = shard identifier, sort = padded shard number
/// - `shard_assignments`: partition = prefixed natural key (write-once)
/// - `economy_address_transactions_<chain>_<shard>`: partition = address
///   identifier, sort = pagination cursor
/// - `pending_transactions_by_hash_<chain>` / `pending_transactions_<chain>`
/// - `sync_meta_<chain>`: indexing watermark
pub mod tables {
    use crate::types::ChainId;

    pub const SHARD_RECORDS: &str = "shard_records";
    pub const SHARD_ASSIGNMENTS: &str = "shard_assignments";

    pub fn economy_address_transactions(chain_id: ChainId, shard_number: u32) -> String {
        format!("economy_address_transactions_{chain_id}_{shard_number}")
    }

    pub fn pending_transactions_by_hash(chain_id: ChainId) -> String {
        format!("pending_transactions_by_hash_{chain_id}")
    }

    pub fn pending_transactions(chain_id: ChainId) -> String {
        format!("pending_transactions_{chain_id}")
    }

    pub fn sync_meta(chain_id: ChainId) -> String {
        format!("sync_meta_{chain_id}")
    }
}

// Sort keys are mapped to a BTree key with a sentinel for key-only tables.
type TableData = BTreeMap<(String, String), Item>;

/// In-memory store for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, TableData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn btree_key(key: &ItemKey) -> (String, String) {
        (
            key.partition.clone(),
            key.sort.clone().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn get(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        let data = self.data.read();
        Ok(data
            .get(table)
            .and_then(|t| t.get(&Self::btree_key(key)))
            .cloned())
    }

    async fn batch_get(&self, table: &str, keys: &[ItemKey]) -> Result<HashMap<ItemKey, Item>> {
        let data = self.data.read();
        let Some(t) = data.get(table) else {
            return Ok(HashMap::new());
        };
        let mut found = HashMap::new();
        for key in keys {
            if let Some(item) = t.get(&Self::btree_key(key)) {
                found.insert(key.clone(), item.clone());
            }
        }
        Ok(found)
    }

    async fn put(&self, table: &str, key: ItemKey, item: Item) -> Result<()> {
        let mut data = self.data.write();
        data.entry(table.to_string())
            .or_default()
            .insert(Self::btree_key(&key), item);
        Ok(())
    }

    async fn put_if_absent(&self, table: &str, key: ItemKey, item: Item) -> Result<Option<Item>> {
        let mut data = self.data.write();
        let t = data.entry(table.to_string()).or_default();
        let bkey = Self::btree_key(&key);
        if let Some(existing) = t.get(&bkey) {
            return Ok(Some(existing.clone()));
        }
        t.insert(bkey, item);
        Ok(None)
    }

    async fn batch_put(&self, table: &str, rows: Vec<(ItemKey, Item)>) -> Result<()> {
        let mut data = self.data.write();
        let t = data.entry(table.to_string()).or_default();
        for (key, item) in rows {
            t.insert(Self::btree_key(&key), item);
        }
        Ok(())
    }

    async fn query(&self, table: &str, partition: &str, opts: QueryOptions) -> Result<QueryPage> {
        if partition.is_empty() {
            return Err(IndexError::validation("partition", "must not be empty"));
        }

        let data = self.data.read();
        let Some(t) = data.get(table) else {
            return Ok(QueryPage {
                items: Vec::new(),
                last_evaluated_key: None,
            });
        };

        let lower = (partition.to_string(), String::new());
        let upper = (format!("{partition}\u{0}"), String::new());
        let in_partition = t.range(lower..upper);

        let after_start = |sort: &String| match (&opts.exclusive_start_key, opts.ascending) {
            (None, _) => true,
            (Some(start), true) => sort > start,
            (Some(start), false) => sort < start,
        };

        let mut matched: Vec<(&String, &Item)> = in_partition
            .map(|((_, sort), item)| (sort, item))
            .collect();
        if !opts.ascending {
            matched.reverse();
        }

        let limit = opts.limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut last_sort: Option<String> = None;
        let mut more = false;

        for (sort, item) in matched.into_iter().filter(|(s, _)| after_start(s)) {
            if items.len() == limit {
                more = true;
                break;
            }
            last_sort = Some(sort.clone());
            items.push(item.clone());
        }

        Ok(QueryPage {
            items,
            last_evaluated_key: if more { last_sort } else { None },
        })
    }
}
