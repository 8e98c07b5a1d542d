//! Typed decoders for inbox logs and proving calldata.
//!
//! Every decoder takes a [`RawLog`] (or raw calldata) and returns a
//! domain-shaped value or a [`DecodeError`]; nothing here touches the store.

use alloy_primitives::{Address, B256};
use alloy_sol_types::{sol_data, SolCall, SolEvent, SolType};
use thiserror::Error;

use proofindex_core::types::Transition;
use proofindex_rpc::RawLog;

use crate::abi::{
    proveBatchesCall, BatchProposed, BatchesProved, BatchesVerified, ConflictingProof, SubProof,
};

/// Errors raised while decoding logs or calldata.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topic0")]
    MissingTopic,

    #[error("topic0 {found} does not match {expected}")]
    TopicMismatch { expected: &'static str, found: String },

    #[error("log is missing its {0}")]
    MissingPosition(&'static str),

    #[error("invalid hex in {field}: {reason}")]
    Hex { field: &'static str, reason: String },

    #[error("ABI decode of {what} failed: {reason}")]
    Abi { what: &'static str, reason: String },

    #[error("BatchesProved carries {ids} batch ids but {transitions} transitions")]
    LengthMismatch { ids: usize, transitions: usize },
}

// ─── Event kinds ──────────────────────────────────────────────────────────────

/// The inbox events the indexer consumes, in fetch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Proposed,
    Proved,
    Verified,
    Conflicting,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        Self::Proposed,
        Self::Proved,
        Self::Verified,
        Self::Conflicting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Proposed => "BatchProposed",
            Self::Proved => "BatchesProved",
            Self::Verified => "BatchesVerified",
            Self::Conflicting => "ConflictingProof",
        }
    }

    pub fn signature_hash(&self) -> B256 {
        match self {
            Self::Proposed => BatchProposed::SIGNATURE_HASH,
            Self::Proved => BatchesProved::SIGNATURE_HASH,
            Self::Verified => BatchesVerified::SIGNATURE_HASH,
            Self::Conflicting => ConflictingProof::SIGNATURE_HASH,
        }
    }

    /// `0x`-prefixed lower-case topic0 as used in `eth_getLogs` filters.
    pub fn topic0(&self) -> String {
        hex_b256(&self.signature_hash())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Decoded values ───────────────────────────────────────────────────────────

/// Where a log sits on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMeta {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEvent {
    pub meta: LogMeta,
    pub batch_id: u64,
    pub proposer: String,
    /// Unix seconds as claimed by the proposer.
    pub proposed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvedEvent {
    pub meta: LogMeta,
    pub verifier: String,
    /// `(batch id, transition)` pairs, in event order.
    pub proofs: Vec<(u64, Transition)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEvent {
    pub meta: LogMeta,
    /// Last batch id verified by this event.
    pub batch_id: u64,
    pub block_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEvent {
    pub meta: LogMeta,
    pub batch_id: u64,
}

// ─── Decoders ─────────────────────────────────────────────────────────────────

pub fn decode_proposed(log: &RawLog) -> Result<ProposedEvent, DecodeError> {
    let (meta, ev) = decode_event::<BatchProposed>(log, EventKind::Proposed)?;
    Ok(ProposedEvent {
        meta,
        batch_id: ev.meta.batchId,
        proposer: hex_address(&ev.meta.proposer),
        proposed_at: ev.meta.proposedAt,
    })
}

pub fn decode_proved(log: &RawLog) -> Result<ProvedEvent, DecodeError> {
    let (meta, ev) = decode_event::<BatchesProved>(log, EventKind::Proved)?;
    if ev.batchIds.len() != ev.transitions.len() {
        return Err(DecodeError::LengthMismatch {
            ids: ev.batchIds.len(),
            transitions: ev.transitions.len(),
        });
    }
    let proofs = ev
        .batchIds
        .iter()
        .zip(&ev.transitions)
        .map(|(id, t)| {
            (
                *id,
                Transition {
                    parent_hash: hex_b256(&t.parentHash),
                    block_hash: hex_b256(&t.blockHash),
                    state_root: hex_b256(&t.stateRoot),
                },
            )
        })
        .collect();
    Ok(ProvedEvent {
        meta,
        verifier: hex_address(&ev.verifier),
        proofs,
    })
}

pub fn decode_verified(log: &RawLog) -> Result<VerifiedEvent, DecodeError> {
    let (meta, ev) = decode_event::<BatchesVerified>(log, EventKind::Verified)?;
    Ok(VerifiedEvent {
        meta,
        batch_id: ev.batchId,
        block_hash: hex_b256(&ev.blockHash),
    })
}

pub fn decode_conflicting(log: &RawLog) -> Result<ConflictEvent, DecodeError> {
    let (meta, ev) = decode_event::<ConflictingProof>(log, EventKind::Conflicting)?;
    Ok(ConflictEvent {
        meta,
        batch_id: ev.batchId,
    })
}

/// Verifier addresses of the `SubProof[]` packed into a `proveBatches` call.
///
/// Returns an empty list when the proof payload is not a sub-proof array
/// (a single-verifier proof).
pub fn decode_sub_verifiers(calldata: &[u8]) -> Result<Vec<String>, DecodeError> {
    let call = proveBatchesCall::abi_decode(calldata, true).map_err(|e| DecodeError::Abi {
        what: "proveBatches calldata",
        reason: e.to_string(),
    })?;
    match <sol_data::Array<SubProof> as SolType>::abi_decode(&call._proof, true) {
        Ok(subs) => Ok(subs.iter().map(|s| hex_address(&s.verifier)).collect()),
        Err(_) => Ok(Vec::new()),
    }
}

fn decode_event<E: SolEvent>(log: &RawLog, kind: EventKind) -> Result<(LogMeta, E), DecodeError> {
    let topic0 = log.topics.first().ok_or(DecodeError::MissingTopic)?;
    let topics = log
        .topics
        .iter()
        .map(|t| {
            t.parse::<B256>().map_err(|e| DecodeError::Hex {
                field: "topics",
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if topics[0] != E::SIGNATURE_HASH {
        return Err(DecodeError::TopicMismatch {
            expected: kind.name(),
            found: topic0.clone(),
        });
    }
    let data = log.data_bytes().map_err(|e| DecodeError::Hex {
        field: "data",
        reason: e.to_string(),
    })?;
    let ev = E::decode_raw_log(topics, &data, true).map_err(|e| DecodeError::Abi {
        what: kind.name(),
        reason: e.to_string(),
    })?;
    Ok((log_meta(log)?, ev))
}

fn log_meta(log: &RawLog) -> Result<LogMeta, DecodeError> {
    Ok(LogMeta {
        block_number: log
            .block_number_u64()
            .ok_or(DecodeError::MissingPosition("block number"))?,
        log_index: log
            .log_index_u64()
            .ok_or(DecodeError::MissingPosition("log index"))?,
        tx_hash: log.tx_hash.to_lowercase(),
    })
}

/// `0x`-prefixed lower-case address.
pub fn hex_address(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr))
}

/// `0x`-prefixed lower-case 32-byte word.
pub fn hex_b256(word: &B256) -> String {
    format!("0x{}", hex::encode(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{self, BatchInfo, BatchMetadata};
    use alloy_primitives::{Bytes, U256};

    fn raw(kind: EventKind, data: Vec<u8>) -> RawLog {
        RawLog {
            address: "0x06a9ab27c7e2255df1815e6cc0168d7755feb19a".into(),
            topics: vec![kind.topic0()],
            data: format!("0x{}", hex::encode(data)),
            block_number: "0x64".into(),
            block_hash: String::new(),
            tx_hash: "0xABC".into(),
            log_index: "0x1".into(),
            removed: None,
        }
    }

    #[test]
    fn topics_are_distinct_and_prefixed() {
        let topics: Vec<String> = EventKind::ALL.iter().map(|k| k.topic0()).collect();
        for t in &topics {
            assert!(t.starts_with("0x"));
            assert_eq!(t.len(), 66);
        }
        let mut dedup = topics.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 4);
    }

    #[test]
    fn decodes_batch_proposed() {
        let ev = BatchProposed {
            info: BatchInfo::default(),
            meta: BatchMetadata {
                infoHash: B256::ZERO,
                proposer: Address::repeat_byte(0xAA),
                batchId: 42,
                proposedAt: 1_700_000_000,
            },
            txList: Bytes::new(),
        };
        let decoded = decode_proposed(&raw(EventKind::Proposed, ev.encode_data())).unwrap();
        assert_eq!(decoded.batch_id, 42);
        assert_eq!(decoded.proposer, format!("0x{}", "aa".repeat(20)));
        assert_eq!(decoded.proposed_at, 1_700_000_000);
        assert_eq!(decoded.meta.block_number, 100);
        assert_eq!(decoded.meta.tx_hash, "0xabc");
    }

    #[test]
    fn decodes_batches_proved_pairs() {
        let ev = BatchesProved {
            verifier: Address::repeat_byte(0x11),
            batchIds: vec![7, 8],
            transitions: vec![
                abi::Transition {
                    parentHash: B256::repeat_byte(1),
                    blockHash: B256::repeat_byte(2),
                    stateRoot: B256::repeat_byte(3),
                },
                abi::Transition::default(),
            ],
        };
        let decoded = decode_proved(&raw(EventKind::Proved, ev.encode_data())).unwrap();
        assert_eq!(decoded.proofs.len(), 2);
        assert_eq!(decoded.proofs[0].0, 7);
        assert_eq!(decoded.proofs[0].1.block_hash, format!("0x{}", "02".repeat(32)));
    }

    #[test]
    fn rejects_mismatched_proved_lengths() {
        let ev = BatchesProved {
            verifier: Address::ZERO,
            batchIds: vec![1, 2],
            transitions: vec![abi::Transition::default()],
        };
        let err = decode_proved(&raw(EventKind::Proved, ev.encode_data())).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { ids: 2, transitions: 1 }));
    }

    #[test]
    fn wrong_topic_is_rejected() {
        let ev = BatchesVerified {
            batchId: 1,
            blockHash: B256::ZERO,
        };
        let log = raw(EventKind::Conflicting, ev.encode_data());
        assert!(matches!(
            decode_verified(&log),
            Err(DecodeError::TopicMismatch { .. })
        ));
    }

    #[test]
    fn truncated_data_is_an_abi_error() {
        let log = raw(EventKind::Verified, vec![0u8; 16]);
        assert!(matches!(decode_verified(&log), Err(DecodeError::Abi { .. })));
    }

    #[test]
    fn sub_verifiers_from_calldata() {
        let subs = vec![
            SubProof {
                verifier: Address::repeat_byte(0x01),
                proof: Bytes::from(vec![1, 2, 3]),
            },
            SubProof {
                verifier: Address::repeat_byte(0x02),
                proof: Bytes::new(),
            },
        ];
        let proof = <sol_data::Array<SubProof> as SolType>::abi_encode(&subs);
        let calldata = proveBatchesCall {
            _params: Bytes::new(),
            _proof: proof.into(),
        }
        .abi_encode();
        let verifiers = decode_sub_verifiers(&calldata).unwrap();
        assert_eq!(
            verifiers,
            vec![format!("0x{}", "01".repeat(20)), format!("0x{}", "02".repeat(20))]
        );
    }

    #[test]
    fn opaque_proof_has_no_sub_verifiers() {
        let calldata = proveBatchesCall {
            _params: Bytes::new(),
            _proof: Bytes::from(U256::from(5).to_be_bytes_vec()),
        }
        .abi_encode();
        assert!(decode_sub_verifiers(&calldata).unwrap().is_empty());
    }

    #[test]
    fn garbage_calldata_is_an_error() {
        assert!(decode_sub_verifiers(&[0xde, 0xad]).is_err());
    }
}
