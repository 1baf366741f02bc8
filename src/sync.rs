//! Block-range indexing driver.
//!
//! Pulls blocks and receipts from the node, overlays pending-transaction
//! data, fans index rows out to shards and advances the per-chain watermark.
//! One block is one unit of work; a failure aborts the run without advancing
//! the watermark past it, and re-running converges because every row write
//! is a deterministic-key upsert.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::TxHash;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::CacheScopes;
use crate::error::{IndexError, Result};
use crate::fanout::{EconomyAddressIndexWriter, FanoutParams, FanoutReport};
use crate::pending::PendingTxReconciler;
use crate::rpc::{parse_hex_u64, NodeClient};
use crate::shards::ShardDirectory;
use crate::store::{tables, Item, ItemKey, TableStore};
use crate::types::{ChainId, TransactionReceipt, TransferEvent};

const WATERMARK_KEY: &str = "last_indexed_block";

/// Everything one block produced: the fan-out outcome plus the reconciled
/// transaction records for downstream detail writers.
#[derive(Debug)]
pub struct BlockOutcome {
    pub block_number: u64,
    pub report: FanoutReport,
    pub transactions: HashMap<TxHash, Value>,
}

pub struct ChainIndexer {
    rpc: Arc<NodeClient>,
    store: Arc<dyn TableStore>,
    directory: Arc<ShardDirectory>,
    writer: EconomyAddressIndexWriter,
    reconciler: PendingTxReconciler,
    chain_id: ChainId,
    /// Allocate shards for unresolved address pairs and retry once, instead
    /// of only reporting them.
    allocate_missing: bool,
}

impl ChainIndexer {
    pub fn new(
        rpc: Arc<NodeClient>,
        store: Arc<dyn TableStore>,
        scopes: Arc<CacheScopes>,
        chain_id: ChainId,
        allocate_missing: bool,
    ) -> Self {
        let directory = Arc::new(ShardDirectory::new(Arc::clone(&store), Arc::clone(&scopes)));
        let writer = EconomyAddressIndexWriter::new(Arc::clone(&store), Arc::clone(&directory));
        let reconciler = PendingTxReconciler::new(Arc::clone(&store), scopes, chain_id);
        Self {
            rpc,
            store,
            directory,
            writer,
            reconciler,
            chain_id,
            allocate_missing,
        }
    }

    pub fn directory(&self) -> &Arc<ShardDirectory> {
        &self.directory
    }

    pub async fn last_indexed_block(&self) -> Result<Option<u64>> {
        let item = self
            .store
            .get(
                &tables::sync_meta(self.chain_id),
                &ItemKey::hash_only(WATERMARK_KEY),
            )
            .await?;
        Ok(item
            .and_then(|i| i.get("block_number").cloned())
            .and_then(|v| v.as_u64()))
    }

    async fn set_last_indexed_block(&self, block: u64) -> Result<()> {
        let mut item = Item::new();
        item.insert("block_number".into(), json!(block));
        self.store
            .put(
                &tables::sync_meta(self.chain_id),
                ItemKey::hash_only(WATERMARK_KEY),
                item,
            )
            .await
    }

    /// Index one block: fetch, reconcile pending data, fan out index rows.
    pub async fn index_block(&self, number: u64) -> Result<BlockOutcome> {
        let block = self
            .rpc
            .get_block(number)
            .await?
            .ok_or_else(|| IndexError::source(format!("block {number} not found")))?;
        let timestamp = parse_hex_u64(&block.timestamp)?;
        let rpc_receipts = self.rpc.get_block_receipts(number).await?;

        let mut receipts: HashMap<TxHash, TransactionReceipt> = HashMap::new();
        let mut transfers: HashMap<TxHash, Vec<TransferEvent>> = HashMap::new();
        let mut confirmed: HashMap<TxHash, Value> = HashMap::new();
        for rpc_receipt in &rpc_receipts {
            let receipt = rpc_receipt.to_receipt()?;
            let hash = receipt.transaction_hash;

            let events = rpc_receipt.transfer_events(hash);
            if !events.is_empty() {
                transfers.insert(hash, events);
            }
            confirmed.insert(
                hash,
                serde_json::to_value(&receipt).map_err(|e| IndexError::source(e.to_string()))?,
            );
            receipts.insert(hash, receipt);
        }

        let transactions = self.reconciler.reconcile(confirmed).await?;

        let params = FanoutParams {
            chain_id: self.chain_id,
            block_timestamp: timestamp,
            receipts,
            transfers,
        };
        let mut report = self.writer.run(params.clone()).await?;

        if !report.shards_not_found.is_empty() && self.allocate_missing {
            for pair in &report.shards_not_found {
                self.directory
                    .allocate_economy_address(self.chain_id, pair)
                    .await?;
            }
            debug!(
                block = number,
                allocated = report.shards_not_found.len(),
                "allocated shards for new address pairs, retrying fan-out"
            );
            report = self.writer.run(params).await?;
        }

        Ok(BlockOutcome {
            block_number: number,
            report,
            transactions,
        })
    }

    /// Index a block range, advancing the watermark after each block.
    /// `from` defaults to watermark + 1, `to` to the node head.
    pub async fn run(&self, from: Option<u64>, to: Option<u64>) -> Result<()> {
        let from = match from {
            Some(n) => n,
            None => self
                .last_indexed_block()
                .await?
                .map(|b| b + 1)
                .unwrap_or(0),
        };
        let to = match to {
            Some(n) => n,
            None => self.rpc.get_block_number().await?,
        };
        if from > to {
            return Err(IndexError::validation(
                "from",
                format!("start {from} is past end {to}"),
            ));
        }

        info!(chain_id = self.chain_id, from, to, "starting index run");
        let total = to - from + 1;
        let mut rows = 0usize;

        for number in from..=to {
            let outcome = self.index_block(number).await?;
            rows += outcome.report.rows_written;
            if !outcome.report.shards_not_found.is_empty() {
                warn!(
                    block = number,
                    unresolved = outcome.report.shards_not_found.len(),
                    "address pairs left without shard assignment"
                );
            }
            self.set_last_indexed_block(number).await?;

            let done = number - from + 1;
            if done % 1000 == 0 {
                info!(
                    block = number,
                    progress = format!("{:.2}%", (done as f64 / total as f64) * 100.0),
                    "indexing"
                );
            }
        }

        info!(chain_id = self.chain_id, rows, "index run complete");
        Ok(())
    }
}
