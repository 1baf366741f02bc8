//! Chain-native types shared across the indexing core.

use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ChainId = u64;

/// Native-chain transactions are not tied to a token contract; their index
/// rows are registered under this pseudo-economy.
pub const NATIVE_ECONOMY: Address = Address::ZERO;

/// Global cache-key namespace prefix.
pub const CACHE_PREFIX: &str = "cs_";

/// Lowercase hex rendering used in identifiers and cache-key suffixes.
pub fn hex_addr(address: &Address) -> String {
    format!("{address:#x}")
}

/// Partition key of an economy-address index row:
/// `<user>-<chain_id>-<economy>`.
pub fn address_identifier(user: &Address, chain_id: ChainId, economy: &Address) -> String {
    format!("{}-{chain_id}-{}", hex_addr(user), hex_addr(economy))
}

/// A confirmed transaction receipt, reduced to the fields the indexing core
/// consumes. Receipts arrive freshly parsed from the node collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    /// Deployed contract for creation transactions.
    pub contract_address: Option<Address>,
    pub transaction_index: u64,
    pub block_number: u64,
    pub status: u64,
}

/// One ERC20-style transfer event extracted from a receipt log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub transaction_hash: TxHash,
    /// The token contract that emitted the event; also the economy the
    /// transfer is indexed under.
    pub contract_address: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub event_index: u64,
}

/// By-hash pending-transaction pointer: resolves a hash to the off-chain
/// identity assigned at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTxPointer {
    pub transaction_uuid: Uuid,
    pub transaction_hash: String,
}
