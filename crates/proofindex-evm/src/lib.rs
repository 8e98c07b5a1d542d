//! proofindex-evm — rollup inbox indexing over EVM JSON-RPC.
//!
//! # Overview
//!
//! - [`AdaptiveLogFetcher`] — `eth_getLogs` with range splitting and backoff
//! - [`VerifierRegistry`] / [`ProofClassifier`] — which proof systems back a proof
//! - [`Indexer`] — lock, rollback, replay and checkpoint of one pass
//! - [`IndexerBuilder`] — fluent construction
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use proofindex_core::IndexerConfig;
//! use proofindex_evm::IndexerBuilder;
//! use proofindex_rpc::{HttpRpcClient, RpcChainReader};
//! use proofindex_storage::InMemoryStateStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IndexerConfig::from_json_file("proofindex.json")?;
//! let reader = RpcChainReader::new(HttpRpcClient::default_for("http://localhost:8545")?);
//! let mut indexer = IndexerBuilder::from_config(config)
//!     .reader(Arc::new(reader))
//!     .store(Arc::new(InMemoryStateStore::new()))
//!     .build()?;
//! let report = indexer.run().await?;
//! println!("{} logs in [{}, {}]", report.events, report.from_block, report.to_block);
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod apply;
pub mod builder;
pub mod classifier;
pub mod events;
pub mod fetcher;
pub mod indexer;
pub mod registry;

pub use builder::IndexerBuilder;
pub use classifier::{Classification, ProofClassifier};
pub use events::{DecodeError, EventKind};
pub use fetcher::AdaptiveLogFetcher;
pub use indexer::{Indexer, RunReport};
pub use registry::{VerifierEntry, VerifierRegistry};
