//! proofindex-core — domain model for the rollup batch lifecycle indexer.
//!
//! # Architecture
//!
//! ```text
//! Indexer::run ──► StateStore (this crate's trait)
//!                     ├── Batch        canonical per-batch state
//!                     ├── BatchProof   one row per observed proof tx
//!                     └── IndexerCursor checkpoint + run lock per chain
//! ```
//!
//! Backends live in `proofindex-storage`; the indexer itself lives in
//! `proofindex-evm`.

pub mod config;
pub mod cursor;
pub mod error;
pub mod store;
pub mod types;

pub use config::{FetchConfig, IndexerConfig, VerifierConfig};
pub use cursor::{IndexerCursor, LockState, RunStatus};
pub use error::IndexerError;
pub use store::StateStore;
pub use types::{
    Batch, BatchProof, BatchStatus, ProofOutcome, ProofSystem, Proposal, Transition, Verification,
};
