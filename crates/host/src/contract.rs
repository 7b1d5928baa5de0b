//! On-chain ledger of block headers
//!
//! The ledger contract accepts strictly sequential appends: `height` must be
//! `last + 1` and `prevBlock` must equal the stored `curBlock` at `last`.

use std::time::Duration;

use alloy_primitives::Address;
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use purchase_core::{BlockHeight, BlockRecord};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ContractError;

mod abi {
    use super::sol;

    sol! {
        struct BlockHeader {
            uint64 height;
            bytes32 curBlock;
            bytes32 prevBlock;
            bytes32 merkleRoot;
            uint64 timestamp;
            string CID;
        }

        function getLastHeight() external view returns (uint64);
        function getByHeight(uint64 height) external view returns (BlockHeader memory);
        function add(
            uint64 height,
            bytes32 curBlock,
            bytes32 prevBlock,
            bytes32 merkleRoot,
            uint64 timestamp,
            string CID
        ) external;
    }
}

/// Message for a known contract revert code
pub fn revert_message(code: u32) -> Option<&'static str> {
    Some(match code {
        3001 => "Height is incorrect",
        3002 => "The previous block hash is not valid",
        3003 => "Must be not more than last height",
        3004 => "The hash length is not valid",
        3005 => "No corresponding block hash key value",
        3006 => "Size are allowed from 1 to 32",
        3050 => "Sequence is different from the expected value",
        _ => return None,
    })
}

impl ContractError {
    /// Build a revert error from a raw reason, resolving catalog codes
    pub fn reverted(reason: &str) -> Self {
        let reason = reason.trim();
        if reason.is_empty() {
            return Self::Reverted {
                code: None,
                message: "execution reverted".to_string(),
            };
        }
        match reason.parse::<u32>().ok().and_then(|c| revert_message(c).map(|m| (c, m))) {
            Some((code, message)) => Self::Reverted {
                code: Some(code),
                message: message.to_string(),
            },
            None => Self::Reverted {
                code: None,
                message: reason.to_string(),
            },
        }
    }
}

/// Append-only header ledger
#[async_trait]
pub trait LedgerContract: Send + Sync {
    /// Height of the last anchored block, 0 when nothing is anchored
    async fn last_height(&self) -> Result<BlockHeight, ContractError>;

    async fn block_by_height(&self, height: BlockHeight) -> Result<BlockRecord, ContractError>;

    /// Append one header; returns the transaction hash
    async fn add(&self, record: &BlockRecord) -> Result<String, ContractError>;
}

/// Ledger contract reached over Ethereum JSON-RPC
#[derive(Clone, Debug)]
pub struct RpcLedger {
    rpc_url: String,
    contract: Address,
    from: Option<Address>,
    http_client: reqwest::Client,
    receipt_timeout: Duration,
    receipt_poll: Duration,
}

impl RpcLedger {
    pub fn new(
        rpc_url: &str,
        contract: Address,
        from: Option<Address>,
        timeout: Duration,
    ) -> Result<Self, ContractError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            rpc_url: rpc_url.to_string(),
            contract,
            from,
            http_client,
            receipt_timeout: timeout,
            receipt_poll: Duration::from_millis(500),
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, ContractError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json::<Value>()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(rpc_error(error));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ContractError::Rpc("no result in response".to_string()))
    }

    async fn call(&self, data: Vec<u8>) -> Result<Vec<u8>, ContractError> {
        let mut tx = json!({
            "to": self.contract,
            "data": format!("0x{}", hex::encode(&data)),
        });
        if let Some(from) = self.from {
            tx["from"] = json!(from);
        }
        let result = self.rpc_call("eth_call", json!([tx, "latest"])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| ContractError::Rpc("eth_call result is not a string".to_string()))?;
        hex::decode(hex_str.trim_start_matches("0x"))
            .map_err(|e| ContractError::Rpc(format!("bad eth_call result: {e}")))
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), ContractError> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self.rpc_call("eth_getTransactionReceipt", json!([tx_hash])).await?;
            if let Some(status) = receipt.get("status").and_then(Value::as_str) {
                return if status == "0x1" {
                    Ok(())
                } else {
                    Err(ContractError::TxFailed(tx_hash.to_string()))
                };
            }
            if Instant::now() >= deadline {
                return Err(ContractError::NoReceipt(tx_hash.to_string()));
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[async_trait]
impl LedgerContract for RpcLedger {
    async fn last_height(&self) -> Result<BlockHeight, ContractError> {
        let data = self.call(abi::getLastHeightCall {}.abi_encode()).await?;
        Ok(abi::getLastHeightCall::abi_decode_returns(&data)?)
    }

    async fn block_by_height(&self, height: BlockHeight) -> Result<BlockRecord, ContractError> {
        let data = self.call(abi::getByHeightCall { height }.abi_encode()).await?;
        let header = abi::getByHeightCall::abi_decode_returns(&data)?;
        Ok(BlockRecord {
            height: header.height,
            cur_block: header.curBlock,
            prev_block: header.prevBlock,
            merkle_root: header.merkleRoot,
            timestamp: header.timestamp,
            blob_id: header.CID,
        })
    }

    async fn add(&self, record: &BlockRecord) -> Result<String, ContractError> {
        let from = self.from.ok_or(ContractError::NotConfigured("contracts.publisher_address"))?;
        let data = encode_add(record);

        // Pre-flight so a revert surfaces with its reason instead of a failed receipt
        self.call(data.clone()).await?;

        let tx = json!({
            "from": from,
            "to": self.contract,
            "data": format!("0x{}", hex::encode(&data)),
            "gas": "0x100000"
        });
        let result = self.rpc_call("eth_sendTransaction", json!([tx])).await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| ContractError::Rpc("no tx hash in response".to_string()))?
            .to_string();
        debug!(height = record.height, %tx_hash, "Append transaction sent");

        self.wait_for_receipt(&tx_hash).await?;
        info!(height = record.height, %tx_hash, "Append transaction confirmed");
        Ok(tx_hash)
    }
}

fn encode_add(record: &BlockRecord) -> Vec<u8> {
    abi::addCall {
        height: record.height,
        curBlock: record.cur_block,
        prevBlock: record.prev_block,
        merkleRoot: record.merkle_root,
        timestamp: record.timestamp,
        CID: record.blob_id.clone(),
    }
    .abi_encode()
}

/// Map a JSON-RPC error object to a contract error, decoding revert data when present
fn rpc_error(error: &Value) -> ContractError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown rpc error");

    let revert_data = error
        .get("data")
        .and_then(|d| d.as_str().or_else(|| d.get("data").and_then(Value::as_str)))
        .and_then(|d| hex::decode(d.trim_start_matches("0x")).ok());
    if let Some(reason) = revert_data
        .as_deref()
        .and_then(alloy_sol_types::decode_revert_reason)
    {
        return ContractError::reverted(strip_revert_prefix(&reason));
    }

    if message.contains("revert") {
        return ContractError::reverted(strip_revert_prefix(message));
    }
    warn!(error = %error, "RPC call failed");
    ContractError::Rpc(message.to_string())
}

fn strip_revert_prefix(reason: &str) -> &str {
    let rest = ["execution reverted", "reverted with reason string", "revert"]
        .iter()
        .find_map(|prefix| reason.split_once(prefix).map(|(_, rest)| rest))
        .unwrap_or(reason);
    rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .trim()
        .trim_matches('\'')
}
