//! chainshard - sharded secondary-index engine for Ethereum-style chains
//!
//! Indexes blocks, transactions and token transfers into a horizontally
//! sharded wide-column store and serves low-latency lookups through a
//! cache-aside layer. Store, cache and node collaborators are trait seams
//! with in-memory/HTTP reference implementations.

pub mod cache;
pub mod cache_aside;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fanout;
pub mod pending;
pub mod rpc;
pub mod shards;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheScope, CacheScopes, MemoryCache};
pub use cache_aside::{BatchKeyCache, SingleKeyCache};
pub use error::{IndexError, Result};
pub use fanout::{EconomyAddressIndexWriter, FanoutParams, FanoutReport};
pub use pending::PendingTxReconciler;
pub use shards::{EntityKind, ShardDirectory, ShardLocation, ShardRecord};
pub use store::{MemoryStore, TableStore};
pub use sync::ChainIndexer;
