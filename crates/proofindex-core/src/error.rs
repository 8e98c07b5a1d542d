//! Error types for the indexing pipeline.

use thiserror::Error;

/// Errors that can occur during an indexer run.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// The run lock was taken over or expired while this run still held it.
    #[error("Run lock lost for chain {chain_id} (token {token})")]
    LockLost { chain_id: u64, token: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if another runner took over this chain mid-run.
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }
}
