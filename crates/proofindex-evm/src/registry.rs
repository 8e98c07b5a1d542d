//! Verifier address → proof system mapping.
//!
//! Seeded from the `{"tee": [...], "sp1": [...], "risc0": [...]}` mapping and
//! grown at runtime: an address nobody configured is probed once for the
//! compose-verifier accessors, and every non-zero sub-verifier it reports is
//! registered under its system and variant. Entries are never removed.

use std::collections::HashMap;
use std::sync::RwLock;

use alloy_primitives::Address;
use alloy_sol_types::{sol_data, SolCall, SolType};
use tracing::{debug, info, warn};

use proofindex_core::config::VerifierConfig;
use proofindex_core::types::ProofSystem;
use proofindex_rpc::{ChainReader, TransportError};

use crate::abi::{
    risc0RethVerifierCall, sgxGethVerifierCall, sgxRethVerifierCall, sp1RethVerifierCall,
    tdxGethVerifierCall,
};
use crate::events::hex_address;

/// One mapping of a verifier address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerifierEntry {
    pub system: ProofSystem,
    /// Sub-verifier flavour (`"sgx-reth"`, `"sp1-reth"`, ...) when known.
    pub variant: Option<String>,
}

/// Compose-verifier accessor selectors with the system/variant they expose.
fn compose_accessors() -> [([u8; 4], ProofSystem, &'static str); 5] {
    [
        (sgxRethVerifierCall::SELECTOR, ProofSystem::Tee, "sgx-reth"),
        (sgxGethVerifierCall::SELECTOR, ProofSystem::Tee, "sgx-geth"),
        (tdxGethVerifierCall::SELECTOR, ProofSystem::Tee, "tdx-geth"),
        (risc0RethVerifierCall::SELECTOR, ProofSystem::Risc0, "risc0-reth"),
        (sp1RethVerifierCall::SELECTOR, ProofSystem::Sp1, "sp1-reth"),
    ]
}

#[derive(Default)]
pub struct VerifierRegistry {
    entries: RwLock<HashMap<String, Vec<VerifierEntry>>>,
    /// Probed addresses → sub-verifiers they reported (empty = not a compose verifier).
    probed: RwLock<HashMap<String, Vec<String>>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &VerifierConfig) -> Self {
        let registry = Self::new();
        let groups = [
            (ProofSystem::Tee, &config.tee),
            (ProofSystem::Sp1, &config.sp1),
            (ProofSystem::Risc0, &config.risc0),
        ];
        for (system, addresses) in groups {
            for address in addresses {
                registry.register(address, system, None);
            }
        }
        registry
    }

    /// Map `address` to `system`. Re-registering the same pair is a no-op.
    pub fn register(&self, address: &str, system: ProofSystem, variant: Option<&str>) {
        let entry = VerifierEntry {
            system,
            variant: variant.map(str::to_string),
        };
        let mut entries = self.entries.write().unwrap();
        let list = entries.entry(address.to_lowercase()).or_default();
        if !list.contains(&entry) {
            list.push(entry);
        }
    }

    /// Entries for `address` known right now, without touching the chain.
    pub fn lookup(&self, address: &str) -> Vec<VerifierEntry> {
        self.entries
            .read()
            .unwrap()
            .get(&address.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Number of distinct addresses mapped.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries for `address`, probing it as a compose verifier the first time
    /// it is seen unmapped. A compose verifier resolves to the union of its
    /// sub-verifiers' entries. A probe cut short by throttling or a network
    /// fault is not cached; the next call probes again.
    pub async fn resolve(&self, reader: &dyn ChainReader, address: &str) -> Vec<VerifierEntry> {
        let address = address.to_lowercase();
        let direct = self.lookup(&address);
        if !direct.is_empty() {
            return direct;
        }

        let cached = self.probed.read().unwrap().get(&address).cloned();
        let subs = match cached {
            Some(subs) => subs,
            None => match self.introspect(reader, &address).await {
                Ok(subs) => {
                    self.probed
                        .write()
                        .unwrap()
                        .insert(address.clone(), subs.clone());
                    subs
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "compose probe interrupted, will retry");
                    return Vec::new();
                }
            },
        };

        let mut out: Vec<VerifierEntry> = Vec::new();
        for sub in &subs {
            for entry in self.lookup(sub) {
                if !out.contains(&entry) {
                    out.push(entry);
                }
            }
        }
        out
    }

    /// Sub-verifiers reported by `address`. Reverts and garbage answers count
    /// as "no such accessor"; transient transport faults abort the probe.
    async fn introspect(
        &self,
        reader: &dyn ChainReader,
        address: &str,
    ) -> Result<Vec<String>, TransportError> {
        let mut found = Vec::new();
        for (selector, system, variant) in compose_accessors() {
            let raw = match reader.call(address, &selector).await {
                Ok(raw) => raw,
                Err(e) if e.is_rate_limited() || e.is_retryable() => return Err(e),
                Err(e) => {
                    debug!(address, variant, error = %e, "accessor call failed");
                    continue;
                }
            };
            let Ok(sub) = <sol_data::Address as SolType>::abi_decode(&raw, true) else {
                continue;
            };
            if sub == Address::ZERO {
                continue;
            }
            let sub = hex_address(&sub);
            self.register(&sub, system, Some(variant));
            found.push(sub);
        }

        if found.is_empty() {
            debug!(address, "not a compose verifier");
        } else {
            info!(address, sub_verifiers = ?found, "discovered compose verifier");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proofindex_rpc::RawLog;
    use std::sync::Mutex;

    const TEE: &str = "0x00000000000000000000000000000000000000aa";
    const COMPOSE: &str = "0x00000000000000000000000000000000000000cc";

    /// Answers `sgxRethVerifier()` and `sp1RethVerifier()` on `COMPOSE`.
    struct ComposeChain {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ChainReader for ComposeChain {
        async fn latest_block_number(&self) -> Result<u64, TransportError> {
            Ok(0)
        }
        async fn block_timestamp(&self, _: u64) -> Result<i64, TransportError> {
            Ok(0)
        }
        async fn transaction_input(&self, _: &str) -> Result<Vec<u8>, TransportError> {
            Ok(vec![])
        }
        async fn get_logs(&self, _: &str, _: &str, _: u64, _: u64) -> Result<Vec<RawLog>, TransportError> {
            Ok(vec![])
        }

        async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
            *self.calls.lock().unwrap() += 1;
            if to != COMPOSE {
                return Err(TransportError::Other("execution reverted".into()));
            }
            let sub = if data == sgxRethVerifierCall::SELECTOR {
                Address::repeat_byte(0x51)
            } else if data == sp1RethVerifierCall::SELECTOR {
                Address::repeat_byte(0x52)
            } else {
                Address::ZERO
            };
            Ok(<sol_data::Address as SolType>::abi_encode(&sub))
        }
    }

    /// Throttles the first `throttled` calls, then answers `sgxRethVerifier()`.
    struct FlakyChain {
        throttled: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ChainReader for FlakyChain {
        async fn latest_block_number(&self) -> Result<u64, TransportError> {
            Ok(0)
        }
        async fn block_timestamp(&self, _: u64) -> Result<i64, TransportError> {
            Ok(0)
        }
        async fn transaction_input(&self, _: &str) -> Result<Vec<u8>, TransportError> {
            Ok(vec![])
        }
        async fn get_logs(&self, _: &str, _: &str, _: u64, _: u64) -> Result<Vec<RawLog>, TransportError> {
            Ok(vec![])
        }

        async fn call(&self, _: &str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if n <= self.throttled {
                return Err(TransportError::RateLimited {
                    provider: "test".into(),
                    message: "too many requests".into(),
                });
            }
            let sub = if data == sgxRethVerifierCall::SELECTOR {
                Address::repeat_byte(0x51)
            } else {
                Address::ZERO
            };
            Ok(<sol_data::Address as SolType>::abi_encode(&sub))
        }
    }

    #[test]
    fn seeded_lookup_is_case_insensitive() {
        let registry = VerifierRegistry::from_config(&VerifierConfig {
            tee: vec![TEE.to_uppercase().replace("0X", "0x")],
            ..Default::default()
        });
        let entries = registry.lookup(TEE);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].system, ProofSystem::Tee);
        assert_eq!(entries[0].variant, None);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = VerifierRegistry::new();
        registry.register(TEE, ProofSystem::Tee, None);
        registry.register(TEE, ProofSystem::Tee, None);
        assert_eq!(registry.lookup(TEE).len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn compose_verifier_is_introspected_once() {
        let chain = ComposeChain { calls: Mutex::new(0) };
        let registry = VerifierRegistry::new();

        let entries = registry.resolve(&chain, COMPOSE).await;
        let systems: Vec<_> = entries.iter().map(|e| e.system).collect();
        assert_eq!(systems, vec![ProofSystem::Tee, ProofSystem::Sp1]);
        assert_eq!(entries[0].variant.as_deref(), Some("sgx-reth"));
        assert_eq!(*chain.calls.lock().unwrap(), 5);

        // Sub-verifiers are now directly mapped.
        let sgx = format!("0x{}", "51".repeat(20));
        assert_eq!(registry.lookup(&sgx)[0].system, ProofSystem::Tee);

        registry.resolve(&chain, COMPOSE).await;
        assert_eq!(*chain.calls.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn negative_introspection_is_cached() {
        let chain = ComposeChain { calls: Mutex::new(0) };
        let registry = VerifierRegistry::new();
        let unknown = "0x00000000000000000000000000000000000000dd";

        assert!(registry.resolve(&chain, unknown).await.is_empty());
        assert!(registry.resolve(&chain, unknown).await.is_empty());
        assert_eq!(*chain.calls.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn throttled_introspection_is_retried() {
        let chain = FlakyChain {
            throttled: 1,
            calls: Mutex::new(0),
        };
        let registry = VerifierRegistry::new();

        assert!(registry.resolve(&chain, COMPOSE).await.is_empty());
        assert_eq!(*chain.calls.lock().unwrap(), 1);

        let entries = registry.resolve(&chain, COMPOSE).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].system, ProofSystem::Tee);
        assert_eq!(entries[0].variant.as_deref(), Some("sgx-reth"));
        assert_eq!(*chain.calls.lock().unwrap(), 6);
    }

    #[tokio::test]
    async fn timeout_does_not_cache_negative_result() {
        struct TimeoutChain;

        #[async_trait]
        impl ChainReader for TimeoutChain {
            async fn latest_block_number(&self) -> Result<u64, TransportError> {
                Ok(0)
            }
            async fn block_timestamp(&self, _: u64) -> Result<i64, TransportError> {
                Ok(0)
            }
            async fn transaction_input(&self, _: &str) -> Result<Vec<u8>, TransportError> {
                Ok(vec![])
            }
            async fn get_logs(&self, _: &str, _: &str, _: u64, _: u64) -> Result<Vec<RawLog>, TransportError> {
                Ok(vec![])
            }
            async fn call(&self, _: &str, _: &[u8]) -> Result<Vec<u8>, TransportError> {
                Err(TransportError::Timeout { ms: 30_000 })
            }
        }

        let registry = VerifierRegistry::new();
        assert!(registry.resolve(&TimeoutChain, COMPOSE).await.is_empty());
        assert!(registry.probed.read().unwrap().get(COMPOSE).is_none());

        let chain = ComposeChain { calls: Mutex::new(0) };
        assert_eq!(registry.resolve(&chain, COMPOSE).await.len(), 2);
    }
}
