//! `ChainReader`: typed, read-only chain access for the indexer.
//!
//! [`RpcChainReader`] implements it over any [`RpcTransport`] with the
//! standard `eth_*` methods.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::RpcTransport;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Block number, if the node sent a well-formed quantity.
    pub fn block_number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.block_number)
    }

    /// Log index within the block.
    pub fn log_index_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Decode the `data` field into bytes.
    pub fn data_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        decode_hex(&self.data)
    }

    /// Position of the log on the chain, for ordering.
    pub fn position(&self) -> (u64, u64) {
        (
            self.block_number_u64().unwrap_or(0),
            self.log_index_u64().unwrap_or(0),
        )
    }
}

/// Read-only chain access required by the indexer.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current head block number.
    async fn latest_block_number(&self) -> Result<u64, TransportError>;

    /// Unix timestamp (seconds) of block `number`.
    async fn block_timestamp(&self, number: u64) -> Result<i64, TransportError>;

    /// Calldata (`input`) of a transaction.
    async fn transaction_input(&self, tx_hash: &str) -> Result<Vec<u8>, TransportError>;

    /// Logs emitted by `address` with `topic0` in `[from, to]` (inclusive).
    async fn get_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, TransportError>;

    /// Read-only `eth_call` against the latest state.
    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// `ChainReader` backed by a JSON-RPC transport.
pub struct RpcChainReader<T> {
    transport: T,
}

impl<T: RpcTransport> RpcChainReader<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: RpcTransport> ChainReader for RpcChainReader<T> {
    async fn latest_block_number(&self) -> Result<u64, TransportError> {
        let hex: String = self.transport.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
            .ok_or_else(|| TransportError::Other(format!("bad block number {hex}")))
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, TransportError> {
        let block: Option<Value> = self
            .transport
            .call("eth_getBlockByNumber", vec![json!(to_quantity(number)), json!(false)])
            .await?;
        let block = block.ok_or_else(|| TransportError::NotFound(format!("block {number}")))?;
        block["timestamp"]
            .as_str()
            .and_then(parse_hex_u64)
            .map(|ts| ts as i64)
            .ok_or_else(|| TransportError::Other(format!("block {number} has no timestamp")))
    }

    async fn transaction_input(&self, tx_hash: &str) -> Result<Vec<u8>, TransportError> {
        let tx: Option<Value> = self
            .transport
            .call("eth_getTransactionByHash", vec![json!(tx_hash)])
            .await?;
        let tx = tx.ok_or_else(|| TransportError::NotFound(format!("transaction {tx_hash}")))?;
        let input = tx["input"]
            .as_str()
            .ok_or_else(|| TransportError::Other(format!("transaction {tx_hash} has no input")))?;
        decode_hex(input).map_err(|e| TransportError::Other(format!("bad input hex: {e}")))
    }

    async fn get_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, TransportError> {
        let filter = json!({
            "address": address,
            "topics": [topic0],
            "fromBlock": to_quantity(from),
            "toBlock": to_quantity(to),
        });
        self.transport.call("eth_getLogs", vec![filter]).await
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let req = json!({ "to": to, "data": format!("0x{}", hex::encode(data)) });
        let out: String = self
            .transport
            .call("eth_call", vec![req, json!("latest")])
            .await?;
        decode_hex(&out).map_err(|e| TransportError::Other(format!("bad call result: {e}")))
    }
}

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}
