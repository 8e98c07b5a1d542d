//! Fluent builder API for creating indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use proofindex_evm::IndexerBuilder;
//! use proofindex_rpc::{HttpRpcClient, RpcChainReader};
//! use proofindex_storage::InMemoryStateStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = RpcChainReader::new(HttpRpcClient::default_for("http://localhost:8545")?);
//! let indexer = IndexerBuilder::new()
//!     .chain_id(167000)
//!     .inbox("0x06a9Ab27c7e2255df1815E6CC0168d7755Feb19a")
//!     .start_block(19_000_000)
//!     .confirmations(12)
//!     .chunk_size(2_000)
//!     .reader(Arc::new(reader))
//!     .store(Arc::new(InMemoryStateStore::new()))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use proofindex_core::config::{FetchConfig, IndexerConfig, VerifierConfig};
use proofindex_core::error::IndexerError;
use proofindex_core::store::StateStore;
use proofindex_rpc::ChainReader;

use crate::indexer::Indexer;
use crate::registry::VerifierRegistry;

/// Fluent builder for [`Indexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    reader: Option<Arc<dyn ChainReader>>,
    store: Option<Arc<dyn StateStore>>,
    registry: Option<Arc<VerifierRegistry>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    /// Set the inbox contract address.
    pub fn inbox(mut self, address: impl Into<String>) -> Self {
        self.config.inbox_address = address.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmations(mut self, depth: u64) -> Self {
        self.config.confirmations = depth;
        self
    }

    /// Blocks re-processed behind the checkpoint on every run.
    pub fn reorg_buffer(mut self, blocks: u64) -> Self {
        self.config.reorg_buffer = blocks;
        self
    }

    /// Set the number of blocks per checkpointed chunk.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn lock_ttl_secs(mut self, secs: u64) -> Self {
        self.config.lock_ttl_secs = secs;
        self
    }

    pub fn verifiers(mut self, verifiers: VerifierConfig) -> Self {
        self.config.verifiers = verifiers;
        self
    }

    pub fn fetch(mut self, fetch: FetchConfig) -> Self {
        self.config.fetch = fetch;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn ChainReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a registry between indexers; otherwise one is seeded from the
    /// configured verifier mapping.
    pub fn registry(mut self, registry: Arc<VerifierRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the `IndexerConfig` alone.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and assemble the indexer.
    pub fn build(self) -> Result<Indexer, IndexerError> {
        self.config.validate()?;
        let reader = self
            .reader
            .ok_or_else(|| IndexerError::Config("no chain reader configured".into()))?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::Config("no state store configured".into()))?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(VerifierRegistry::from_config(&self.config.verifiers)));
        Ok(Indexer::new(self.config, reader, store, registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.confirmations, 12);
        assert_eq!(cfg.reorg_buffer, 64);
        assert_eq!(cfg.chunk_size, 2_000);
        assert_eq!(cfg.lock_ttl_secs, 300);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .chain_id(167000)
            .inbox("0x06a9Ab27c7e2255df1815E6CC0168d7755Feb19a")
            .start_block(50_000)
            .confirmations(32)
            .reorg_buffer(8)
            .chunk_size(500)
            .build_config();

        assert_eq!(cfg.chain_id, 167000);
        assert_eq!(cfg.start_block, 50_000);
        assert_eq!(cfg.confirmations, 32);
        assert_eq!(cfg.reorg_buffer, 8);
        assert_eq!(cfg.chunk_size, 500);
    }

    #[test]
    fn build_requires_reader_and_store() {
        let err = IndexerBuilder::new()
            .inbox("0x06a9Ab27c7e2255df1815E6CC0168d7755Feb19a")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = IndexerBuilder::new().inbox("nope").build().err().unwrap();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
