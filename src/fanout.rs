//! Secondary-index fan-out writer.
//!
//! Turns a block's parsed transactions and transfer events into per-address
//! index rows and inserts them into the correct shard. Every participating
//! address (sender, recipient, deployed or token contract) gets one row per
//! transaction or per transfer event, keyed by a deterministic
//! `(address identifier, pagination cursor)` pair, so re-running a block is
//! an upsert that converges instead of duplicating.
//!
//! Shard resolution for the whole batch completes before the first insert is
//! issued; pairs with no assignment are reported, not retried inline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, TxHash};
use futures::future::try_join_all;
use serde_json::json;
use tracing::{debug, warn};

use crate::cursor;
use crate::error::{IndexError, Result};
use crate::shards::{EconomyUserPair, ShardDirectory, ShardLocation};
use crate::store::{tables, Item, ItemKey, TableStore};
use crate::types::{
    address_identifier, ChainId, TransactionReceipt, TransferEvent, NATIVE_ECONOMY,
};

/// economy address -> user address -> tx hash -> in-transaction event
/// positions (1-based; empty for plain transaction participation).
pub type ParticipantMap = HashMap<Address, HashMap<Address, HashMap<TxHash, Vec<u64>>>>;

/// Register `from`, `to` and any deployed contract of every transaction
/// under the native pseudo-economy. One entry per distinct address, not per
/// role.
pub fn format_as_economy_address_transactions(
    receipts: &HashMap<TxHash, TransactionReceipt>,
) -> ParticipantMap {
    let mut map = ParticipantMap::new();
    for (tx_hash, receipt) in receipts {
        let mut participants = vec![receipt.from];
        participants.extend(receipt.to);
        participants.extend(receipt.contract_address);

        let economy = map.entry(NATIVE_ECONOMY).or_default();
        for address in participants {
            economy
                .entry(address)
                .or_default()
                .entry(*tx_hash)
                .or_default();
        }
    }
    map
}

/// Register `from`, `to` and the token contract of every transfer event
/// under the token's own economy, deduplicating repeated event positions per
/// (address, transaction).
pub fn format_as_economy_address_transfers(
    transfers: &HashMap<TxHash, Vec<TransferEvent>>,
) -> ParticipantMap {
    let mut map = ParticipantMap::new();
    for (tx_hash, events) in transfers {
        for event in events {
            let economy = map.entry(event.contract_address).or_default();
            for address in [event.from, event.to, event.contract_address] {
                let positions = economy.entry(address).or_default().entry(*tx_hash).or_default();
                if !positions.contains(&event.event_index) {
                    positions.push(event.event_index);
                }
            }
        }
    }
    map
}

fn merge_participants(into: &mut ParticipantMap, from: ParticipantMap) {
    for (economy, users) in from {
        let economy_entry = into.entry(economy).or_default();
        for (user, txs) in users {
            let user_entry = economy_entry.entry(user).or_default();
            for (tx_hash, positions) in txs {
                let existing = user_entry.entry(tx_hash).or_default();
                for position in positions {
                    if !existing.contains(&position) {
                        existing.push(position);
                    }
                }
            }
        }
    }
}

/// One writer run's input: everything parsed out of a single block.
#[derive(Debug, Clone)]
pub struct FanoutParams {
    pub chain_id: ChainId,
    pub block_timestamp: u64,
    pub receipts: HashMap<TxHash, TransactionReceipt>,
    pub transfers: HashMap<TxHash, Vec<TransferEvent>>,
}

/// Outcome of a writer run. `shards_not_found` is a partial-failure signal:
/// those pairs' rows were skipped and the caller decides whether to retry
/// the unresolved subset.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub rows_written: usize,
    pub shards_not_found: Vec<EconomyUserPair>,
}

pub struct EconomyAddressIndexWriter {
    store: Arc<dyn TableStore>,
    directory: Arc<ShardDirectory>,
}

impl EconomyAddressIndexWriter {
    pub fn new(store: Arc<dyn TableStore>, directory: Arc<ShardDirectory>) -> Self {
        Self { store, directory }
    }

    pub async fn run(&self, params: FanoutParams) -> Result<FanoutReport> {
        if params.block_timestamp == 0 {
            return Err(IndexError::validation("block_timestamp", "must be set"));
        }

        let mut participants = format_as_economy_address_transactions(&params.receipts);
        merge_participants(
            &mut participants,
            format_as_economy_address_transfers(&params.transfers),
        );

        let pairs: Vec<EconomyUserPair> = participants
            .iter()
            .flat_map(|(economy, users)| {
                users.keys().map(|user| EconomyUserPair {
                    economy: *economy,
                    user: *user,
                })
            })
            .collect();
        if pairs.is_empty() {
            return Ok(FanoutReport::default());
        }

        // Read barrier: every resolution completes before any insert, since
        // row placement depends on the results.
        let resolver = self.directory.economy_address_resolver(params.chain_id);
        let resolved = resolver.fetch(&pairs).await?;

        let mut per_shard: HashMap<ShardLocation, Vec<(ItemKey, Item)>> = HashMap::new();
        let mut not_found: HashSet<EconomyUserPair> = HashSet::new();
        let mut rows_written = 0usize;

        for (economy, users) in &participants {
            for (user, txs) in users {
                let pair = EconomyUserPair {
                    economy: *economy,
                    user: *user,
                };
                let Some(location) = resolved.get(&pair) else {
                    not_found.insert(pair);
                    continue;
                };

                let partition = address_identifier(user, params.chain_id, economy);
                let rows = per_shard.entry(location.clone()).or_default();
                for (tx_hash, positions) in txs {
                    let tx_index = params
                        .receipts
                        .get(tx_hash)
                        .map(|r| r.transaction_index)
                        .unwrap_or(0);
                    for row in index_rows(&partition, params.block_timestamp, tx_index, tx_hash, positions)? {
                        rows.push(row);
                        rows_written += 1;
                    }
                }
            }
        }

        if !not_found.is_empty() {
            warn!(
                chain_id = params.chain_id,
                pairs = not_found.len(),
                "skipping address pairs with no shard assignment"
            );
        }

        // One batch insert per destination shard, issued concurrently.
        let inserts = per_shard.into_iter().map(|(location, rows)| {
            let table = tables::economy_address_transactions(params.chain_id, location.shard_number);
            let store = Arc::clone(&self.store);
            async move { store.batch_put(&table, rows).await }
        });
        try_join_all(inserts).await?;

        debug!(
            chain_id = params.chain_id,
            rows = rows_written,
            "fan-out complete"
        );

        Ok(FanoutReport {
            rows_written,
            shards_not_found: not_found.into_iter().collect(),
        })
    }
}

// Rows for one (address, transaction) pairing: a single transaction-level
// row when there are no event positions, one row per event otherwise.
fn index_rows(
    partition: &str,
    block_timestamp: u64,
    tx_index: u64,
    tx_hash: &TxHash,
    positions: &[u64],
) -> Result<Vec<(ItemKey, Item)>> {
    let tx_index = u32::try_from(tx_index)
        .map_err(|_| IndexError::validation("transaction_index", "out of range"))?;

    let mut rows = Vec::new();
    if positions.is_empty() {
        let sort = cursor::encode(block_timestamp, tx_index, 0)?;
        rows.push((
            ItemKey::with_sort(partition.to_string(), sort),
            row_item(tx_hash, None),
        ));
    } else {
        for &position in positions {
            let position = u32::try_from(position)
                .map_err(|_| IndexError::validation("event_index", "out of range"))?;
            let sort = cursor::encode(block_timestamp, tx_index, position)?;
            rows.push((
                ItemKey::with_sort(partition.to_string(), sort),
                row_item(tx_hash, Some(position)),
            ));
        }
    }
    Ok(rows)
}

fn row_item(tx_hash: &TxHash, event_index: Option<u32>) -> Item {
    let mut item = Item::new();
    item.insert("transaction_hash".into(), json!(format!("{tx_hash:#x}")));
    if let Some(position) = event_index {
        item.insert("event_index".into(), json!(position));
    }
    item
}
