//! Shared fixtures: an in-process chain and log builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::{sol_data, SolCall, SolEvent, SolType};
use async_trait::async_trait;

use proofindex_core::config::{FetchConfig, VerifierConfig};
use proofindex_evm::abi::{self, BatchInfo, BatchMetadata};
use proofindex_evm::events::hex_address;
use proofindex_evm::{EventKind, Indexer, IndexerBuilder};
use proofindex_rpc::{ChainReader, RawLog, TransportError};
use proofindex_storage::InMemoryStateStore;

pub const CHAIN_ID: u64 = 167_000;
pub const INBOX: &str = "0x06a9ab27c7e2255df1815e6cc0168d7755feb19a";
pub const GENESIS_TS: i64 = 1_700_000_000;

pub const TEE_VERIFIER: u8 = 0xa1;
pub const SP1_VERIFIER: u8 = 0xb1;
pub const RISC0_VERIFIER: u8 = 0xc1;
pub const COMPOSE_VERIFIER: u8 = 0xf0;

type LogsHook = Box<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<RawLog>,
    inputs: HashMap<String, Vec<u8>>,
    timestamps: HashMap<u64, i64>,
    fail_logs: Option<String>,
    get_logs_calls: usize,
    on_get_logs: Option<LogsHook>,
}

/// A scripted chain: logs, calldata and timestamps set up by the test.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Arc::new(Self::default());
        chain.set_head(head);
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn push(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn set_input(&self, tx: &str, input: Vec<u8>) {
        self.state.lock().unwrap().inputs.insert(tx.to_string(), input);
    }

    pub fn set_timestamp(&self, block: u64, ts: i64) {
        self.state.lock().unwrap().timestamps.insert(block, ts);
    }

    /// Drop every log in `block` (a reorg replacing it).
    pub fn reorg_block(&self, block: u64) {
        let hex = format!("0x{block:x}");
        self.state.lock().unwrap().logs.retain(|l| l.block_number != hex);
    }

    pub fn fail_logs(&self, message: Option<&str>) {
        self.state.lock().unwrap().fail_logs = message.map(str::to_string);
    }

    pub fn on_get_logs(&self, hook: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.state.lock().unwrap().on_get_logs = Some(Box::new(hook));
    }

    pub fn get_logs_calls(&self) -> usize {
        self.state.lock().unwrap().get_logs_calls
    }
}

pub fn block_ts(block: u64) -> i64 {
    GENESIS_TS + block as i64 * 12
}

#[async_trait]
impl ChainReader for MockChain {
    async fn latest_block_number(&self) -> Result<u64, TransportError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, TransportError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .timestamps
            .get(&number)
            .copied()
            .unwrap_or_else(|| block_ts(number)))
    }

    async fn transaction_input(&self, tx_hash: &str) -> Result<Vec<u8>, TransportError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .inputs
            .get(tx_hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.get_logs_calls += 1;
        if let Some(hook) = &state.on_get_logs {
            hook(from, to);
        }
        if let Some(message) = &state.fail_logs {
            return Err(TransportError::Other(message.clone()));
        }
        let mut logs: Vec<RawLog> = state
            .logs
            .iter()
            .filter(|l| l.address.eq_ignore_ascii_case(address))
            .filter(|l| l.topics.first().is_some_and(|t| t == topic0))
            .filter(|l| (from..=to).contains(&l.position().0))
            .cloned()
            .collect();
        logs.sort_by_key(RawLog::position);
        Ok(logs)
    }

    async fn call(&self, _to: &str, _data: &[u8]) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Other("execution reverted".into()))
    }
}

// ─── Builders ─────────────────────────────────────────────────────────────────

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn addr_hex(byte: u8) -> String {
    hex_address(&addr(byte))
}

pub fn hash_hex(byte: u8) -> String {
    format!("0x{}", hex::encode([byte; 32]))
}

pub fn tx(n: u64) -> String {
    format!("0x{n:064x}")
}

fn raw(kind: EventKind, data: Vec<u8>, block: u64, index: u64, tx: &str) -> RawLog {
    RawLog {
        address: INBOX.to_string(),
        topics: vec![kind.topic0()],
        data: format!("0x{}", hex::encode(data)),
        block_number: format!("0x{block:x}"),
        block_hash: hash_hex(block as u8),
        tx_hash: tx.to_string(),
        log_index: format!("0x{index:x}"),
        removed: None,
    }
}

pub fn proposed(block: u64, index: u64, tx: &str, batch_id: u64, proposed_at: u64) -> RawLog {
    let ev = abi::BatchProposed {
        info: BatchInfo::default(),
        meta: BatchMetadata {
            infoHash: B256::repeat_byte(0x99),
            proposer: addr(0x77),
            batchId: batch_id,
            proposedAt: proposed_at,
        },
        txList: Bytes::new(),
    };
    raw(EventKind::Proposed, ev.encode_data(), block, index, tx)
}

/// `items` are `(batch id, block hash byte)` pairs.
pub fn proved(block: u64, index: u64, tx: &str, verifier: u8, items: &[(u64, u8)]) -> RawLog {
    let ev = abi::BatchesProved {
        verifier: addr(verifier),
        batchIds: items.iter().map(|(id, _)| *id).collect(),
        transitions: items
            .iter()
            .map(|(_, h)| abi::Transition {
                parentHash: B256::repeat_byte(h.wrapping_sub(1)),
                blockHash: B256::repeat_byte(*h),
                stateRoot: B256::repeat_byte(h.wrapping_add(0x80)),
            })
            .collect(),
    };
    raw(EventKind::Proved, ev.encode_data(), block, index, tx)
}

pub fn verified(block: u64, index: u64, tx: &str, batch_id: u64, hash: u8) -> RawLog {
    let ev = abi::BatchesVerified {
        batchId: batch_id,
        blockHash: B256::repeat_byte(hash),
    };
    raw(EventKind::Verified, ev.encode_data(), block, index, tx)
}

pub fn conflicting(block: u64, index: u64, tx: &str, batch_id: u64) -> RawLog {
    let ev = abi::ConflictingProof {
        batchId: batch_id,
        oldTran: abi::TransitionState::default(),
        newTran: abi::Transition::default(),
    };
    raw(EventKind::Conflicting, ev.encode_data(), block, index, tx)
}

/// `proveBatches` calldata whose proof is a `SubProof[]` over `verifiers`.
pub fn prove_calldata(verifiers: &[u8]) -> Vec<u8> {
    let subs: Vec<abi::SubProof> = verifiers
        .iter()
        .map(|b| abi::SubProof {
            verifier: addr(*b),
            proof: Bytes::from(vec![*b; 4]),
        })
        .collect();
    abi::proveBatchesCall {
        _params: Bytes::new(),
        _proof: <sol_data::Array<abi::SubProof> as SolType>::abi_encode(&subs).into(),
    }
    .abi_encode()
}

pub fn verifier_config() -> VerifierConfig {
    VerifierConfig {
        tee: vec![addr_hex(TEE_VERIFIER)],
        sp1: vec![addr_hex(SP1_VERIFIER)],
        risc0: vec![addr_hex(RISC0_VERIFIER)],
    }
}

/// Indexer over `chain`/`store`: no confirmations, 10-block reorg buffer.
pub fn indexer(chain: &Arc<MockChain>, store: &Arc<InMemoryStateStore>, chunk_size: u64) -> Indexer {
    IndexerBuilder::new()
        .chain_id(CHAIN_ID)
        .inbox(INBOX)
        .confirmations(0)
        .reorg_buffer(10)
        .chunk_size(chunk_size)
        .verifiers(verifier_config())
        .fetch(FetchConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..Default::default()
        })
        .reader(chain.clone())
        .store(store.clone())
        .build()
        .unwrap()
}
