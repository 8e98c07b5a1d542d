//! Batch lifecycle types shared by the indexer, the stores, and the query layer.

use serde::{Deserialize, Serialize};

// ─── ProofSystem ──────────────────────────────────────────────────────────────

/// Proof system backing a verifier contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProofSystem {
    #[serde(rename = "TEE")]
    Tee,
    #[serde(rename = "SP1")]
    Sp1,
    #[serde(rename = "RISC0")]
    Risc0,
}

impl ProofSystem {
    pub const ALL: [ProofSystem; 3] = [Self::Tee, Self::Sp1, Self::Risc0];

    /// Canonical upper-case label (`"TEE"`, `"SP1"`, `"RISC0"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tee => "TEE",
            Self::Sp1 => "SP1",
            Self::Risc0 => "RISC0",
        }
    }
}

impl std::fmt::Display for ProofSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProofSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tee" | "sgx" => Ok(Self::Tee),
            "sp1" => Ok(Self::Sp1),
            "risc0" => Ok(Self::Risc0),
            other => Err(format!("unknown proof system '{other}'")),
        }
    }
}

// ─── Transition ───────────────────────────────────────────────────────────────

/// The `{parentHash, blockHash, stateRoot}` triple asserted by a proof.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub parent_hash: String,
    pub block_hash: String,
    pub state_root: String,
}

// ─── BatchStatus ──────────────────────────────────────────────────────────────

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Proposed,
    Proven,
    Verified,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Proven => "proven",
            Self::Verified => "verified",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "proven" => Ok(Self::Proven),
            "verified" => Ok(Self::Verified),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

// ─── Batch components ─────────────────────────────────────────────────────────

/// Proposal facts, present once a `BatchProposed` log has been seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposer: String,
    /// Unix seconds, clamped to the containing block's timestamp.
    pub proposed_at: i64,
    pub proposed_block: u64,
    pub proposed_tx: String,
}

/// A single proof attempt's provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOutcome {
    pub tx_hash: String,
    pub verifier: String,
    pub proof_systems: Vec<ProofSystem>,
    pub variants: Vec<String>,
    pub transition: Transition,
    pub proven_at: i64,
    pub proven_block: u64,
}

impl ProofOutcome {
    /// Ordering key for "earliest proof wins". Ties on time fall back to block
    /// and then tx hash so the winner does not depend on arrival order.
    pub fn precedence(&self) -> (i64, u64, &str) {
        (self.proven_at, self.proven_block, self.tx_hash.as_str())
    }

    /// Returns `true` if `self` should replace `other` on an unverified batch.
    pub fn precedes(&self, other: &ProofOutcome) -> bool {
        self.precedence() < other.precedence()
    }
}

/// Verification facts from a `BatchesVerified` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub verified_at: i64,
    pub verified_block: u64,
    pub verified_tx: String,
    /// Only known for the batch id the event actually reported.
    pub block_hash: Option<String>,
}

// ─── Batch ────────────────────────────────────────────────────────────────────

/// Canonical per-batch state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: u64,
    pub proposal: Option<Proposal>,
    pub proof: Option<ProofOutcome>,
    pub verification: Option<Verification>,
    pub status: BatchStatus,
    pub is_contested: bool,
    /// Synthesized from a verification alone; never seen proposed.
    pub is_legacy: bool,
}

impl Batch {
    /// A bare row for a batch referenced before its proposal was seen.
    pub fn placeholder(batch_id: u64) -> Self {
        Self {
            batch_id,
            proposal: None,
            proof: None,
            verification: None,
            status: BatchStatus::Proposed,
            is_contested: false,
            is_legacy: false,
        }
    }

    /// A verified-only row synthesized while advancing the verified range.
    pub fn legacy(batch_id: u64, verification: Verification) -> Self {
        Self {
            verification: Some(verification),
            status: BatchStatus::Verified,
            is_legacy: true,
            ..Self::placeholder(batch_id)
        }
    }

    /// Status implied by the facts currently on the row.
    pub fn derived_status(&self) -> BatchStatus {
        if self.verification.is_some() {
            BatchStatus::Verified
        } else if self.proof.is_some() {
            BatchStatus::Proven
        } else {
            BatchStatus::Proposed
        }
    }

    /// Recompute `status` from the row's facts.
    pub fn refresh_status(&mut self) {
        self.status = self.derived_status();
    }

    pub fn is_verified(&self) -> bool {
        self.verification.is_some()
    }

    /// Block hash the chain settled on for this batch, if reported.
    pub fn verified_block_hash(&self) -> Option<&str> {
        self.verification.as_ref()?.block_hash.as_deref()
    }

    /// Returns `true` if nothing but the legacy marker keeps this row alive.
    pub fn is_orphaned_placeholder(&self) -> bool {
        self.is_legacy
            && self.proposal.is_none()
            && self.proof.is_none()
            && self.verification.is_none()
            && !self.is_contested
    }
}

// ─── BatchProof ───────────────────────────────────────────────────────────────

/// One observed proof attempt, unique on `(batch_id, tx_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProof {
    pub batch_id: u64,
    #[serde(flatten)]
    pub outcome: ProofOutcome,
    pub is_verified: bool,
}

impl BatchProof {
    pub fn new(batch_id: u64, outcome: ProofOutcome) -> Self {
        Self {
            batch_id,
            outcome,
            is_verified: false,
        }
    }

    pub fn tx_hash(&self) -> &str {
        &self.outcome.tx_hash
    }

    pub fn proven_block(&self) -> u64 {
        self.outcome.proven_block
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(tx: &str, at: i64, block: u64) -> ProofOutcome {
        ProofOutcome {
            tx_hash: tx.into(),
            verifier: "0xv".into(),
            proof_systems: vec![ProofSystem::Sp1],
            variants: vec![],
            transition: Transition::default(),
            proven_at: at,
            proven_block: block,
        }
    }

    #[test]
    fn derived_status_follows_facts() {
        let mut b = Batch::placeholder(1);
        assert_eq!(b.derived_status(), BatchStatus::Proposed);
        b.proof = Some(outcome("0xa", 10, 1));
        assert_eq!(b.derived_status(), BatchStatus::Proven);
        b.verification = Some(Verification {
            verified_at: 20,
            verified_block: 2,
            verified_tx: "0xv".into(),
            block_hash: None,
        });
        assert_eq!(b.derived_status(), BatchStatus::Verified);
    }

    #[test]
    fn earlier_proof_precedes_later() {
        let early = outcome("0xb", 100, 9);
        let late = outcome("0xa", 200, 5);
        assert!(early.precedes(&late));
        assert!(!late.precedes(&early));
    }

    #[test]
    fn precedence_ties_break_deterministically() {
        let a = outcome("0xa", 100, 9);
        let b = outcome("0xb", 100, 9);
        assert!(a.precedes(&b) ^ b.precedes(&a));
    }

    #[test]
    fn proof_system_serde_labels() {
        let json = serde_json::to_string(&vec![ProofSystem::Tee, ProofSystem::Sp1]).unwrap();
        assert_eq!(json, r#"["TEE","SP1"]"#);
        assert_eq!("risc0".parse::<ProofSystem>().unwrap(), ProofSystem::Risc0);
    }

    #[test]
    fn batch_proof_flattens_outcome() {
        let p = BatchProof::new(7, outcome("0xabc", 1, 2));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["batch_id"], 7);
        assert_eq!(v["tx_hash"], "0xabc");
        assert_eq!(v["is_verified"], false);
    }

    #[test]
    fn legacy_rows_are_verified() {
        let b = Batch::legacy(
            5,
            Verification {
                verified_at: 1,
                verified_block: 1,
                verified_tx: "0x1".into(),
                block_hash: None,
            },
        );
        assert!(b.is_legacy);
        assert_eq!(b.status, BatchStatus::Verified);
        assert!(!b.is_orphaned_placeholder());
    }
}
