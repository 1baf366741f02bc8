//! chainshard - sharded secondary-index engine for Ethereum-style chains
//!
//! # Usage
//!
//! 1. Provision shards for the chains you index
//! 2. Run backfill to index a block range
//!
//! The bundled backends are the in-memory reference implementations; a
//! deployment swaps them for durable store/cache collaborators behind the
//! same traits.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::Result;

use chainshard::cache::{CacheScopes, MemoryCache};
use chainshard::config::IndexerConfig;
use chainshard::rpc::NodeClient;
use chainshard::shards::EntityKind;
use chainshard::store::{MemoryStore, TableStore};
use chainshard::sync::ChainIndexer;

#[derive(Parser)]
#[command(name = "chainshard")]
#[command(about = "Sharded secondary-index engine for Ethereum-style chains")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a block range from JSON-RPC
    Backfill {
        /// JSON-RPC endpoint URL; repeat for failover
        #[arg(long, default_value = "http://localhost:8545")]
        rpc_url: Vec<String>,

        /// Chain id of the network being indexed
        #[arg(long)]
        chain_id: u64,

        /// Starting block number (defaults to watermark + 1)
        #[arg(long)]
        from_block: Option<u64>,

        /// Ending block number (defaults to node head)
        #[arg(long)]
        to_block: Option<u64>,

        /// Economy-address shards to provision before indexing
        #[arg(long, default_value = "4")]
        shards: u32,
    },

    /// Provision shards for one entity kind
    ProvisionShards {
        #[arg(long)]
        chain_id: u64,

        /// Entity kind: block, transaction or economy-address
        #[arg(long, default_value = "economy-address")]
        kind: String,

        #[arg(long, default_value = "4")]
        count: u32,
    },
}

fn parse_kind(kind: &str) -> Result<EntityKind> {
    match kind {
        "block" => Ok(EntityKind::Block),
        "transaction" => Ok(EntityKind::Transaction),
        "economy-address" => Ok(EntityKind::EconomyAddress),
        other => eyre::bail!("unknown entity kind `{other}`"),
    }
}

fn build_scopes(chain_id: u64) -> Arc<CacheScopes> {
    let scopes = CacheScopes::new(Arc::new(MemoryCache::with_defaults()));
    scopes.register_chain(chain_id, Arc::new(MemoryCache::with_defaults()));
    Arc::new(scopes)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Backfill {
            rpc_url,
            chain_id,
            from_block,
            to_block,
            shards,
        } => {
            let config = IndexerConfig {
                chain_id,
                node_endpoints: rpc_url,
                allocate_missing_shards: true,
                initial_shard_count: shards,
            };
            config.validate()?;

            let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
            let scopes = build_scopes(chain_id);
            let rpc = Arc::new(NodeClient::new(config.node_endpoints.clone())?);
            let indexer = ChainIndexer::new(
                rpc,
                store,
                scopes,
                chain_id,
                config.allocate_missing_shards,
            );

            for number in 1..=config.initial_shard_count {
                indexer
                    .directory()
                    .provision_shard(EntityKind::EconomyAddress, chain_id, number, true)
                    .await?;
            }

            indexer.run(from_block, to_block).await?;
            tracing::info!(
                last = ?indexer.last_indexed_block().await?,
                "backfill finished"
            );
        }

        Commands::ProvisionShards {
            chain_id,
            kind,
            count,
        } => {
            let kind = parse_kind(&kind)?;
            let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
            let directory = chainshard::ShardDirectory::new(store, build_scopes(chain_id));
            for number in 1..=count {
                directory
                    .provision_shard(kind, chain_id, number, true)
                    .await?;
            }
            let available = directory.available_shards(kind, chain_id).await?;
            println!(
                "{} shard(s) available for {}",
                available.len(),
                kind.shard_identifier(chain_id)
            );
        }
    }

    Ok(())
}
