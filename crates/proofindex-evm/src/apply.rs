//! Applying inbox events to the state store.
//!
//! [`EventApplier`] owns the per-range state the handlers share: the
//! last-verified batch cursor and a block timestamp cache. All writes are
//! upserts keyed by batch id or `(batch id, proof tx)`, so replaying a range
//! after [`EventApplier::rollback`] converges to the same rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use proofindex_core::error::IndexerError;
use proofindex_core::store::StateStore;
use proofindex_core::types::{Batch, BatchProof, ProofOutcome, Proposal, Verification};
use proofindex_rpc::{ChainReader, RawLog, TransportError};

use crate::classifier::ProofClassifier;
use crate::events::{
    decode_conflicting, decode_proposed, decode_proved, decode_verified, EventKind,
};

pub(crate) fn rpc_err(e: TransportError) -> IndexerError {
    IndexerError::Rpc(e.to_string())
}

pub struct EventApplier {
    store: Arc<dyn StateStore>,
    reader: Arc<dyn ChainReader>,
    classifier: ProofClassifier,
    last_verified: Option<u64>,
    timestamps: HashMap<u64, i64>,
}

impl EventApplier {
    pub fn new(
        store: Arc<dyn StateStore>,
        reader: Arc<dyn ChainReader>,
        classifier: ProofClassifier,
    ) -> Self {
        Self {
            store,
            reader,
            classifier,
            last_verified: None,
            timestamps: HashMap::new(),
        }
    }

    /// Highest batch id known verified, as tracked during the current range.
    pub fn last_verified(&self) -> Option<u64> {
        self.last_verified
    }

    pub fn classifier(&self) -> &ProofClassifier {
        &self.classifier
    }

    /// Forget per-range caches.
    pub fn begin_range(&mut self) {
        self.timestamps.clear();
    }

    // ─── Rollback ─────────────────────────────────────────────────────────────

    /// Undo everything derived from blocks `[from, to]` and reconcile the
    /// affected batches from what remains. Returns the affected batch ids.
    pub async fn rollback(&mut self, from: u64, to: u64) -> Result<Vec<u64>, IndexerError> {
        let removed = self.store.delete_proofs_in_range(from, to).await?;

        let mut touched: BTreeMap<u64, Batch> = BTreeMap::new();
        for mut batch in self.store.batches_verified_in_range(from, to).await? {
            batch.verification = None;
            self.store.set_verified_proof(batch.batch_id, None).await?;
            touched.insert(batch.batch_id, batch);
        }
        for proof in &removed {
            if touched.contains_key(&proof.batch_id) {
                continue;
            }
            if let Some(batch) = self.store.batch(proof.batch_id).await? {
                touched.insert(proof.batch_id, batch);
            }
        }

        let ids: Vec<u64> = touched.keys().copied().collect();
        for (_, batch) in touched {
            self.reconcile(batch).await?;
        }
        if !ids.is_empty() {
            info!(
                from,
                to,
                proofs_removed = removed.len(),
                batches = ids.len(),
                "rolled back range"
            );
        }
        Ok(ids)
    }

    /// Re-derive a batch's proof and status from its remaining proof rows.
    async fn reconcile(&self, mut batch: Batch) -> Result<(), IndexerError> {
        let proofs = self.store.proofs_for_batch(batch.batch_id).await?;
        let verified_hash = batch.verified_block_hash().map(str::to_string);

        let chosen = proofs
            .iter()
            .find(|p| p.is_verified)
            .or_else(|| {
                let hash = verified_hash.as_deref()?;
                proofs
                    .iter()
                    .filter(|p| p.outcome.transition.block_hash.eq_ignore_ascii_case(hash))
                    .min_by(|a, b| a.outcome.precedence().cmp(&b.outcome.precedence()))
            })
            .or_else(|| {
                proofs
                    .iter()
                    .min_by(|a, b| a.outcome.precedence().cmp(&b.outcome.precedence()))
            });

        batch.proof = chosen.map(|p| p.outcome.clone());
        batch.refresh_status();

        if batch.is_orphaned_placeholder() {
            debug!(batch_id = batch.batch_id, "dropping orphaned legacy row");
            self.store.delete_batch(batch.batch_id).await
        } else {
            self.store.upsert_batch(&batch).await
        }
    }

    /// Reset the last-verified cursor to what was verified strictly before `block`.
    pub async fn reset_last_verified(&mut self, block: u64) -> Result<(), IndexerError> {
        self.last_verified = self.store.last_verified_batch_before(block).await?;
        Ok(())
    }

    // ─── Dispatch ─────────────────────────────────────────────────────────────

    pub async fn apply(&mut self, kind: EventKind, log: &RawLog) -> Result<(), IndexerError> {
        match kind {
            EventKind::Proposed => self.on_proposed(log).await,
            EventKind::Proved => self.on_proved(log).await,
            EventKind::Verified => self.on_verified(log).await,
            EventKind::Conflicting => self.on_conflicting(log).await,
        }
    }

    async fn block_timestamp(&mut self, block: u64) -> Result<i64, IndexerError> {
        if let Some(ts) = self.timestamps.get(&block) {
            return Ok(*ts);
        }
        let ts = self.reader.block_timestamp(block).await.map_err(rpc_err)?;
        self.timestamps.insert(block, ts);
        Ok(ts)
    }

    async fn load_or_placeholder(&self, batch_id: u64) -> Result<Batch, IndexerError> {
        Ok(self
            .store
            .batch(batch_id)
            .await?
            .unwrap_or_else(|| Batch::placeholder(batch_id)))
    }

    // ─── Handlers ─────────────────────────────────────────────────────────────

    async fn on_proposed(&mut self, log: &RawLog) -> Result<(), IndexerError> {
        let ev = match decode_proposed(log) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(tx = %log.tx_hash, error = %e, "skipping undecodable BatchProposed");
                return Ok(());
            }
        };

        let block_ts = self.block_timestamp(ev.meta.block_number).await?;
        let mut proposed_at = i64::try_from(ev.proposed_at).unwrap_or(i64::MAX);
        if proposed_at > block_ts {
            warn!(
                batch_id = ev.batch_id,
                proposed_at,
                block_ts,
                "proposal timestamp ahead of its block, clamping"
            );
            proposed_at = block_ts;
        }

        let mut batch = self.load_or_placeholder(ev.batch_id).await?;
        batch.proposal = Some(Proposal {
            proposer: ev.proposer,
            proposed_at,
            proposed_block: ev.meta.block_number,
            proposed_tx: ev.meta.tx_hash,
        });
        batch.is_legacy = false;
        batch.refresh_status();
        self.store.upsert_batch(&batch).await?;
        debug!(batch_id = ev.batch_id, "batch proposed");
        Ok(())
    }

    async fn on_proved(&mut self, log: &RawLog) -> Result<(), IndexerError> {
        let ev = match decode_proved(log) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(tx = %log.tx_hash, error = %e, "skipping undecodable BatchesProved");
                return Ok(());
            }
        };

        let calldata = self
            .reader
            .transaction_input(&ev.meta.tx_hash)
            .await
            .map_err(rpc_err)?;
        let class = self.classifier.classify(&ev.verifier, &calldata).await;
        let proven_at = self.block_timestamp(ev.meta.block_number).await?;

        for (batch_id, transition) in ev.proofs {
            let outcome = ProofOutcome {
                tx_hash: ev.meta.tx_hash.clone(),
                verifier: ev.verifier.clone(),
                proof_systems: class.proof_systems.clone(),
                variants: class.variants.clone(),
                transition,
                proven_at,
                proven_block: ev.meta.block_number,
            };
            self.record_proof(batch_id, outcome).await?;
        }
        Ok(())
    }

    async fn record_proof(&self, batch_id: u64, outcome: ProofOutcome) -> Result<(), IndexerError> {
        let was_verified = self
            .store
            .proofs_for_batch(batch_id)
            .await?
            .iter()
            .any(|p| p.tx_hash() == outcome.tx_hash && p.is_verified);
        let mut row = BatchProof::new(batch_id, outcome.clone());
        row.is_verified = was_verified;
        self.store.upsert_proof(&row).await?;

        let mut batch = self.load_or_placeholder(batch_id).await?;
        if batch.is_verified() {
            let verified_hash = batch.verified_block_hash().map(str::to_string);
            match verified_hash.as_deref() {
                Some(hash) if hash.eq_ignore_ascii_case(&outcome.transition.block_hash) => {
                    let tx = outcome.tx_hash.clone();
                    batch.proof = Some(outcome);
                    self.store.set_verified_proof(batch_id, Some(&tx)).await?;
                }
                Some(_) => {
                    debug!(batch_id, tx = %outcome.tx_hash, "proof does not match verified transition");
                    return Ok(());
                }
                None if batch.proof.is_none() => batch.proof = Some(outcome),
                None => return Ok(()),
            }
        } else {
            let replace = match &batch.proof {
                None => true,
                Some(current) => outcome.precedes(current),
            };
            if !replace {
                return Ok(());
            }
            batch.proof = Some(outcome);
        }

        batch.refresh_status();
        self.store.upsert_batch(&batch).await
    }

    async fn on_verified(&mut self, log: &RawLog) -> Result<(), IndexerError> {
        let ev = match decode_verified(log) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(tx = %log.tx_hash, error = %e, "skipping undecodable BatchesVerified");
                return Ok(());
            }
        };

        let last = ev.batch_id;
        if let Some(prev) = self.last_verified {
            if last <= prev {
                debug!(batch_id = last, prev, "verification already covered");
                return Ok(());
            }
        }
        let first = self.last_verified.map_or(last, |prev| prev + 1);

        let verification = Verification {
            verified_at: self.block_timestamp(ev.meta.block_number).await?,
            verified_block: ev.meta.block_number,
            verified_tx: ev.meta.tx_hash.clone(),
            block_hash: None,
        };
        let synthesized = self
            .store
            .mark_verified_range(first, last, &verification)
            .await?;

        let Some(mut batch) = self.store.batch(last).await? else {
            return Err(IndexerError::Storage(format!(
                "batch {last} missing right after being marked verified"
            )));
        };
        batch.verification = Some(Verification {
            block_hash: Some(ev.block_hash.clone()),
            ..verification
        });

        let matching = self
            .store
            .proofs_for_batch(last)
            .await?
            .into_iter()
            .filter(|p| p.outcome.transition.block_hash.eq_ignore_ascii_case(&ev.block_hash))
            .min_by(|a, b| a.outcome.precedence().cmp(&b.outcome.precedence()));
        match matching {
            Some(proof) => {
                self.store
                    .set_verified_proof(last, Some(proof.tx_hash()))
                    .await?;
                batch.proof = Some(proof.outcome);
            }
            None => self.store.set_verified_proof(last, None).await?,
        }
        batch.refresh_status();
        self.store.upsert_batch(&batch).await?;

        self.last_verified = Some(last);
        info!(first, last, synthesized, "batches verified");
        Ok(())
    }

    async fn on_conflicting(&mut self, log: &RawLog) -> Result<(), IndexerError> {
        let ev = match decode_conflicting(log) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(tx = %log.tx_hash, error = %e, "skipping undecodable ConflictingProof");
                return Ok(());
            }
        };
        let mut batch = self.load_or_placeholder(ev.batch_id).await?;
        batch.is_contested = true;
        self.store.upsert_batch(&batch).await?;
        warn!(batch_id = ev.batch_id, tx = %ev.meta.tx_hash, "conflicting proof observed");
        Ok(())
    }
}
