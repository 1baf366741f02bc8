//! Indexer configuration, passed by constructor injection.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::types::ChainId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub chain_id: ChainId,
    /// JSON-RPC endpoints, tried in order on each call.
    pub node_endpoints: Vec<String>,
    /// Allocate shards for address pairs seen for the first time instead of
    /// only reporting them as unresolved.
    #[serde(default = "default_allocate_missing")]
    pub allocate_missing_shards: bool,
    /// Economy-address shards provisioned up front when none exist.
    #[serde(default = "default_initial_shards")]
    pub initial_shard_count: u32,
}

fn default_allocate_missing() -> bool {
    true
}

fn default_initial_shards() -> u32 {
    4
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_endpoints.is_empty() {
            return Err(IndexError::validation(
                "node_endpoints",
                "at least one endpoint is required",
            ));
        }
        if self.initial_shard_count == 0 {
            return Err(IndexError::validation(
                "initial_shard_count",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_on_deserialize() {
        let config: IndexerConfig = serde_json::from_str(
            r#"{"chain_id": 2000, "node_endpoints": ["http://localhost:8545"]}"#,
        )
        .unwrap();
        assert!(config.allocate_missing_shards);
        assert_eq!(config.initial_shard_count, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let config = IndexerConfig {
            chain_id: 1,
            node_endpoints: vec![],
            allocate_missing_shards: true,
            initial_shard_count: 4,
        };
        assert_eq!(config.validate().unwrap_err().code(), "VALIDATION_ERROR");
    }
}
