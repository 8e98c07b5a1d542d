//! Indexer configuration.
//!
//! Loaded from a JSON file, then overridden by `PROOFINDEX_*` environment
//! variables, then validated.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Verifier address lists per proof system, as shipped in the JSON mapping
/// file: `{"tee": [...], "sp1": [...], "risc0": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub tee: Vec<String>,
    #[serde(default)]
    pub sp1: Vec<String>,
    #[serde(default)]
    pub risc0: Vec<String>,
}

impl VerifierConfig {
    pub fn from_json_str(json: &str) -> Result<Self, IndexerError> {
        serde_json::from_str(json)
            .map_err(|e| IndexerError::Config(format!("verifier mapping: {e}")))
    }
}

/// Tuning for the adaptive log fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retries of a throttled sub-range before the error propagates.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Known provider range limit; `None` = discover from errors.
    pub initial_max_range: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 15_000,
            initial_max_range: None,
        }
    }
}

/// Configuration for one chain's indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Numeric chain id; keys the cursor row.
    pub chain_id: u64,
    /// Rollup inbox contract emitting the batch events.
    pub inbox_address: String,
    /// First block ever indexed.
    #[serde(default)]
    pub start_block: u64,
    /// Blocks behind head considered safe to index.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Trailing blocks re-processed on every run.
    #[serde(default = "default_reorg_buffer")]
    pub reorg_buffer: u64,
    /// Blocks per checkpointed chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Run lock time-to-live, refreshed at each checkpoint.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default)]
    pub verifiers: VerifierConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

fn default_confirmations() -> u64 {
    12
}

fn default_reorg_buffer() -> u64 {
    64
}

fn default_chunk_size() -> u64 {
    2_000
}

/// Longest accepted run lock TTL (one week).
pub const MAX_LOCK_TTL_SECS: u64 = 7 * 24 * 60 * 60;

fn default_lock_ttl_secs() -> u64 {
    300
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            inbox_address: String::new(),
            start_block: 0,
            confirmations: default_confirmations(),
            reorg_buffer: default_reorg_buffer(),
            chunk_size: default_chunk_size(),
            lock_ttl_secs: default_lock_ttl_secs(),
            verifiers: VerifierConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, IndexerError> {
        serde_json::from_str(json).map_err(|e| IndexerError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Apply `PROOFINDEX_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), IndexerError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), IndexerError> {
        let num = |key: &str| -> Result<Option<u64>, IndexerError> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|e| IndexerError::Config(format!("{key}={v}: {e}")))
                })
                .transpose()
        };

        if let Some(v) = num("PROOFINDEX_CHAIN_ID")? {
            self.chain_id = v;
        }
        if let Some(v) = lookup("PROOFINDEX_INBOX_ADDRESS") {
            self.inbox_address = v;
        }
        if let Some(v) = num("PROOFINDEX_START_BLOCK")? {
            self.start_block = v;
        }
        if let Some(v) = num("PROOFINDEX_CONFIRMATIONS")? {
            self.confirmations = v;
        }
        if let Some(v) = num("PROOFINDEX_REORG_BUFFER")? {
            self.reorg_buffer = v;
        }
        if let Some(v) = num("PROOFINDEX_CHUNK_SIZE")? {
            self.chunk_size = v;
        }
        if let Some(v) = num("PROOFINDEX_LOCK_TTL_SECS")? {
            self.lock_ttl_secs = v;
        }
        Ok(())
    }

    /// Reject configurations the indexer cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if !is_address(&self.inbox_address) {
            return Err(IndexerError::Config(format!(
                "inbox_address '{}' is not a 20-byte hex address",
                self.inbox_address
            )));
        }
        if self.chunk_size == 0 {
            return Err(IndexerError::Config("chunk_size must be > 0".into()));
        }
        if self.lock_ttl_secs == 0 {
            return Err(IndexerError::Config("lock_ttl_secs must be > 0".into()));
        }
        if self.lock_ttl_secs > MAX_LOCK_TTL_SECS {
            return Err(IndexerError::Config(format!(
                "lock_ttl_secs must be <= {MAX_LOCK_TTL_SECS}"
            )));
        }
        if self.fetch.initial_max_range == Some(0) {
            return Err(IndexerError::Config("fetch.initial_max_range must be > 0".into()));
        }
        let verifiers = self
            .verifiers
            .tee
            .iter()
            .chain(&self.verifiers.sp1)
            .chain(&self.verifiers.risc0);
        for addr in verifiers {
            if !is_address(addr) {
                return Err(IndexerError::Config(format!("bad verifier address '{addr}'")));
            }
        }
        Ok(())
    }
}

fn is_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}
