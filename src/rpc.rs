//! JSON-RPC node client.
//!
//! Every call walks the configured endpoints in order until one succeeds;
//! node unavailability is a retryable per-call failure, and only exhausting
//! every endpoint surfaces an error. No client-side timeout policy beyond
//! reqwest's defaults.
//!
//! Transfer events are recognized by raw topic layout (canonical Transfer
//! signature hash, 3 topics); no ABI machinery.

use alloy_primitives::{b256, Address, TxHash, B256, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::{IndexError, Result};
use crate::types::{TransactionReceipt, TransferEvent};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    pub number: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RpcReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "transactionIndex")]
    pub transaction_index: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    pub from: String,
    pub to: Option<String>,
    #[serde(rename = "contractAddress")]
    pub contract_address: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

pub fn parse_hex_u64(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|_| IndexError::validation("hex", format!("`{value}` is not a hex quantity")))
}

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|_| IndexError::validation("address", format!("`{value}` is not an address")))
}

impl RpcReceipt {
    /// Reduce the wire receipt to the fields the indexing core consumes.
    pub fn to_receipt(&self) -> Result<TransactionReceipt> {
        Ok(TransactionReceipt {
            transaction_hash: self.transaction_hash.parse().map_err(|_| {
                IndexError::validation("transaction_hash", self.transaction_hash.clone())
            })?,
            from: parse_address(&self.from)?,
            to: self.to.as_deref().map(parse_address).transpose()?,
            contract_address: self.contract_address.as_deref().map(parse_address).transpose()?,
            transaction_index: parse_hex_u64(&self.transaction_index)?,
            block_number: parse_hex_u64(&self.block_number)?,
            status: self
                .status
                .as_deref()
                .map(parse_hex_u64)
                .transpose()?
                .unwrap_or(1),
        })
    }

    /// Extract ERC20-style transfer events, positioned 1-based within the
    /// transaction (position 0 is reserved for the transaction-level index
    /// row).
    pub fn transfer_events(&self, tx_hash: TxHash) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        let mut position = 0u64;
        for log in &self.logs {
            if log.topics.len() != 3 {
                continue;
            }
            let Ok(topic0) = log.topics[0].parse::<B256>() else {
                continue;
            };
            if topic0 != TRANSFER_TOPIC {
                continue;
            }
            let (Ok(from_topic), Ok(to_topic)) =
                (log.topics[1].parse::<B256>(), log.topics[2].parse::<B256>())
            else {
                continue;
            };
            let Ok(contract) = parse_address(&log.address) else {
                continue;
            };
            let Ok(data) = hex::decode(log.data.trim_start_matches("0x")) else {
                continue;
            };
            if data.len() != 32 {
                continue;
            }

            position += 1;
            events.push(TransferEvent {
                transaction_hash: tx_hash,
                contract_address: contract,
                from: Address::from_slice(&from_topic.as_slice()[12..]),
                to: Address::from_slice(&to_topic.as_slice()[12..]),
                amount: U256::from_be_slice(&data),
                event_index: position,
            });
        }
        events
    }
}

#[derive(Debug)]
pub struct NodeClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl NodeClient {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(IndexError::validation(
                "endpoints",
                "at least one node endpoint is required",
            ));
        }
        Ok(Self {
            endpoints,
            client: reqwest::Client::new(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.call_endpoint(endpoint, &body).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(endpoint, method, error = %e, "node call failed, trying next endpoint");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| IndexError::source("no endpoints configured")))
    }

    async fn call_endpoint<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp: serde_json::Value = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::source(e.to_string()))?
            .json()
            .await
            .map_err(|e| IndexError::source(e.to_string()))?;

        if let Some(error) = resp.get("error") {
            return Err(IndexError::source(format!("rpc error: {error}")));
        }
        let result = resp
            .get("result")
            .ok_or_else(|| IndexError::source("no result in response"))?;
        serde_json::from_value(result.clone()).map_err(|e| IndexError::source(e.to_string()))
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex)
    }

    pub async fn get_block(&self, number: u64) -> Result<Option<RpcBlock>> {
        self.call(
            "eth_getBlockByNumber",
            json!([format!("0x{number:x}"), true]),
        )
        .await
    }

    pub async fn get_block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>> {
        self.call("eth_getBlockReceipts", json!([format!("0x{number:x}")]))
            .await
    }

    pub async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<RpcReceipt>> {
        self.call("eth_getTransactionReceipt", json!([format!("{hash:#x}")]))
            .await
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        let hex: String = self
            .call("eth_getBalance", json!([format!("{address:#x}"), "latest"]))
            .await?;
        U256::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|_| IndexError::validation("balance", format!("`{hex}` is not hex")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_log(token: &str, from: Address, to: Address, amount: u64) -> RpcLog {
        RpcLog {
            address: token.into(),
            topics: vec![
                format!("{TRANSFER_TOPIC:#x}"),
                format!("0x000000000000000000000000{from:x}"),
                format!("0x000000000000000000000000{to:x}"),
            ],
            data: format!("0x{amount:064x}"),
        }
    }

    fn receipt_with_logs(logs: Vec<RpcLog>) -> RpcReceipt {
        RpcReceipt {
            transaction_hash: format!("{:#x}", TxHash::with_last_byte(1)),
            transaction_index: "0x2".into(),
            block_number: "0x64".into(),
            from: "0x0000000000000000000000000000000000000001".into(),
            to: Some("0x0000000000000000000000000000000000000002".into()),
            contract_address: None,
            status: Some("0x1".into()),
            logs,
        }
    }

    #[test]
    fn test_to_receipt_parses_hex_fields() {
        let receipt = receipt_with_logs(vec![]).to_receipt().unwrap();
        assert_eq!(receipt.transaction_index, 2);
        assert_eq!(receipt.block_number, 100);
        assert_eq!(receipt.status, 1);
    }

    #[test]
    fn test_transfer_events_are_positioned_one_based() {
        let token = "0x00000000000000000000000000000000000000ee";
        let a = Address::with_last_byte(1);
        let b = Address::with_last_byte(2);
        let c = Address::with_last_byte(3);
        let receipt =
            receipt_with_logs(vec![transfer_log(token, a, b, 10), transfer_log(token, b, c, 20)]);

        let events = receipt.transfer_events(TxHash::with_last_byte(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_index, 1);
        assert_eq!(events[1].event_index, 2);
        assert_eq!(events[0].amount, U256::from(10));
        assert_eq!(events[0].from, a);
        assert_eq!(events[0].to, b);
    }

    #[test]
    fn test_non_transfer_logs_are_skipped() {
        let receipt = receipt_with_logs(vec![
            RpcLog {
                address: "0x00000000000000000000000000000000000000ee".into(),
                // ERC721-style: 4 topics, not an ERC20 transfer
                topics: vec![
                    format!("{TRANSFER_TOPIC:#x}"),
                    format!("{:#x}", B256::with_last_byte(1)),
                    format!("{:#x}", B256::with_last_byte(2)),
                    format!("{:#x}", B256::with_last_byte(3)),
                ],
                data: "0x".into(),
            },
            RpcLog {
                address: "0x00000000000000000000000000000000000000ee".into(),
                topics: vec![format!("{:#x}", B256::with_last_byte(9))],
                data: "0x".into(),
            },
        ]);

        assert!(receipt.transfer_events(TxHash::with_last_byte(1)).is_empty());
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("0x1b4").unwrap(), 436);
        assert!(parse_hex_u64("nope").is_err());
    }

    #[test]
    fn test_client_requires_endpoints() {
        let err = NodeClient::new(vec![]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
