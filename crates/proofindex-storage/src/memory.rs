//! In-memory state store.
//!
//! Keeps batches, proofs and cursors behind a single mutex so every trait
//! call is atomic, matching the transactional guarantees of the SQL backend.
//! All data is lost when the process exits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use proofindex_core::cursor::{IndexerCursor, RunStatus};
use proofindex_core::error::IndexerError;
use proofindex_core::store::StateStore;
use proofindex_core::types::{Batch, BatchProof, Verification};

#[derive(Default)]
struct Tables {
    cursors: HashMap<u64, IndexerCursor>,
    batches: BTreeMap<u64, Batch>,
    proofs: BTreeMap<(u64, String), BatchProof>,
}

/// In-memory `StateStore`.
#[derive(Default)]
pub struct InMemoryStateStore {
    tables: Mutex<Tables>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches, ordered by id.
    pub fn batches(&self) -> Vec<Batch> {
        self.tables.lock().unwrap().batches.values().cloned().collect()
    }

    /// All proofs, ordered by `(batch_id, tx_hash)`.
    pub fn proofs(&self) -> Vec<BatchProof> {
        self.tables.lock().unwrap().proofs.values().cloned().collect()
    }

    /// Force a lock row into a given state (tests simulating a competing runner).
    pub fn set_cursor(&self, cursor: IndexerCursor) {
        self.tables
            .lock()
            .unwrap()
            .cursors
            .insert(cursor.chain_id, cursor);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn cursor(&self, chain_id: u64) -> Result<Option<IndexerCursor>, IndexerError> {
        Ok(self.tables.lock().unwrap().cursors.get(&chain_id).cloned())
    }

    async fn try_acquire_lock(
        &self,
        chain_id: u64,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let cursor = tables
            .cursors
            .entry(chain_id)
            .or_insert_with(|| IndexerCursor::new(chain_id, now));
        Ok(cursor.try_lock(token, expires_at, now))
    }

    async fn checkpoint(
        &self,
        chain_id: u64,
        token: &str,
        block: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        match tables.cursors.get_mut(&chain_id) {
            Some(cursor) => cursor.checkpoint(token, block, expires_at, now),
            None => Err(IndexerError::LockLost {
                chain_id,
                token: token.to_string(),
            }),
        }
    }

    async fn release_lock(
        &self,
        chain_id: u64,
        token: &str,
        status: RunStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(cursor) = tables.cursors.get_mut(&chain_id) {
            if !cursor.release(token, status, error, now) {
                tracing::warn!(chain_id, token, "lock already released or taken over");
            }
        }
        Ok(())
    }

    async fn force_release(&self, chain_id: u64, now: DateTime<Utc>) -> Result<bool, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(cursor) = tables.cursors.get_mut(&chain_id) else {
            return Ok(false);
        };
        let Some(token) = cursor.lock_token.clone() else {
            return Ok(false);
        };
        Ok(cursor.release(&token, RunStatus::Failed, Some("lock force-released"), now))
    }

    async fn batch(&self, batch_id: u64) -> Result<Option<Batch>, IndexerError> {
        Ok(self.tables.lock().unwrap().batches.get(&batch_id).cloned())
    }

    async fn upsert_batch(&self, batch: &Batch) -> Result<(), IndexerError> {
        self.tables
            .lock()
            .unwrap()
            .batches
            .insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn delete_batch(&self, batch_id: u64) -> Result<(), IndexerError> {
        self.tables.lock().unwrap().batches.remove(&batch_id);
        Ok(())
    }

    async fn batches_verified_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<Batch>, IndexerError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .batches
            .values()
            .filter(|b| {
                b.verification
                    .as_ref()
                    .is_some_and(|v| (from..=to).contains(&v.verified_block))
            })
            .cloned()
            .collect())
    }

    async fn last_verified_batch_before(&self, block: u64) -> Result<Option<u64>, IndexerError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .batches
            .values()
            .rev()
            .find(|b| {
                b.verification
                    .as_ref()
                    .is_some_and(|v| v.verified_block < block)
            })
            .map(|b| b.batch_id))
    }

    async fn mark_verified_range(
        &self,
        first: u64,
        last: u64,
        verification: &Verification,
    ) -> Result<u64, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let mut synthesized = 0;
        for id in first..=last {
            match tables.batches.get_mut(&id) {
                Some(batch) => {
                    batch.verification = Some(verification.clone());
                    batch.refresh_status();
                }
                None => {
                    tables
                        .batches
                        .insert(id, Batch::legacy(id, verification.clone()));
                    synthesized += 1;
                }
            }
        }
        Ok(synthesized)
    }

    async fn upsert_proof(&self, proof: &BatchProof) -> Result<(), IndexerError> {
        let key = (proof.batch_id, proof.tx_hash().to_string());
        self.tables.lock().unwrap().proofs.insert(key, proof.clone());
        Ok(())
    }

    async fn proofs_for_batch(&self, batch_id: u64) -> Result<Vec<BatchProof>, IndexerError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .proofs
            .range((batch_id, String::new())..)
            .take_while(|((id, _), _)| *id == batch_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn delete_proofs_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<BatchProof>, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let doomed: Vec<(u64, String)> = tables
            .proofs
            .iter()
            .filter(|(_, p)| (from..=to).contains(&p.proven_block()))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(doomed
            .into_iter()
            .filter_map(|k| tables.proofs.remove(&k))
            .collect())
    }

    async fn set_verified_proof(
        &self,
        batch_id: u64,
        tx_hash: Option<&str>,
    ) -> Result<(), IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        for ((id, tx), proof) in tables.proofs.iter_mut() {
            if *id == batch_id {
                proof.is_verified = Some(tx.as_str()) == tx_hash;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proofindex_core::types::{BatchStatus, ProofOutcome, ProofSystem, Transition};

    fn proof(batch_id: u64, tx: &str, block: u64) -> BatchProof {
        BatchProof::new(
            batch_id,
            ProofOutcome {
                tx_hash: tx.into(),
                verifier: "0xv".into(),
                proof_systems: vec![ProofSystem::Tee],
                variants: vec![],
                transition: Transition::default(),
                proven_at: block as i64 * 12,
                proven_block: block,
            },
        )
    }

    fn verification(block: u64) -> Verification {
        Verification {
            verified_at: block as i64 * 12,
            verified_block: block,
            verified_tx: format!("0xv{block}"),
            block_hash: None,
        }
    }

    #[tokio::test]
    async fn proof_upsert_is_keyed_by_batch_and_tx() {
        let store = InMemoryStateStore::new();
        store.upsert_proof(&proof(1, "0xa", 10)).await.unwrap();
        store.upsert_proof(&proof(1, "0xa", 10)).await.unwrap();
        store.upsert_proof(&proof(1, "0xb", 11)).await.unwrap();
        store.upsert_proof(&proof(2, "0xa", 10)).await.unwrap();
        assert_eq!(store.proofs().len(), 3);
        assert_eq!(store.proofs_for_batch(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_proofs_in_range_returns_removed_rows() {
        let store = InMemoryStateStore::new();
        for (i, block) in [95u64, 100, 106].iter().enumerate() {
            store
                .upsert_proof(&proof(i as u64, &format!("0x{i}"), *block))
                .await
                .unwrap();
        }
        let removed = store.delete_proofs_in_range(95, 105).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.proofs().len(), 1);
        assert_eq!(store.proofs()[0].proven_block(), 106);
    }

    #[tokio::test]
    async fn mark_verified_range_synthesizes_legacy_rows() {
        let store = InMemoryStateStore::new();
        let mut known = Batch::placeholder(12);
        known.proof = Some(proof(12, "0xp", 5).outcome);
        known.refresh_status();
        store.upsert_batch(&known).await.unwrap();

        let created = store.mark_verified_range(11, 13, &verification(20)).await.unwrap();
        assert_eq!(created, 2);

        let batches = store.batches();
        assert!(batches.iter().all(|b| b.status == BatchStatus::Verified));
        assert!(batches[0].is_legacy && !batches[1].is_legacy && batches[2].is_legacy);
    }

    #[tokio::test]
    async fn last_verified_before_block() {
        let store = InMemoryStateStore::new();
        store.mark_verified_range(1, 3, &verification(10)).await.unwrap();
        store.mark_verified_range(4, 6, &verification(20)).await.unwrap();
        assert_eq!(store.last_verified_batch_before(20).await.unwrap(), Some(3));
        assert_eq!(store.last_verified_batch_before(21).await.unwrap(), Some(6));
        assert_eq!(store.last_verified_batch_before(10).await.unwrap(), None);
        assert_eq!(store.batches_verified_in_range(15, 25).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn set_verified_proof_flags_exactly_one() {
        let store = InMemoryStateStore::new();
        store.upsert_proof(&proof(1, "0xa", 10)).await.unwrap();
        store.upsert_proof(&proof(1, "0xb", 11)).await.unwrap();
        store.set_verified_proof(1, Some("0xb")).await.unwrap();
        let flags: Vec<bool> = store.proofs().iter().map(|p| p.is_verified).collect();
        assert_eq!(flags, vec![false, true]);
        store.set_verified_proof(1, None).await.unwrap();
        assert!(store.proofs().iter().all(|p| !p.is_verified));
    }

    #[tokio::test]
    async fn lock_lifecycle() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        let ttl = Duration::seconds(60);
        assert!(store.try_acquire_lock(1, "a", now + ttl, now).await.unwrap());
        assert!(!store.try_acquire_lock(1, "b", now + ttl, now).await.unwrap());

        store.checkpoint(1, "a", 500, now + ttl, now).await.unwrap();
        assert!(store.checkpoint(1, "b", 600, now + ttl, now).await.unwrap_err().is_lock_lost());

        store.release_lock(1, "a", RunStatus::Success, None, now).await.unwrap();
        let cursor = store.cursor(1).await.unwrap().unwrap();
        assert_eq!(cursor.last_processed_block, Some(500));
        assert_eq!(cursor.last_run_status, Some(RunStatus::Success));
        assert!(cursor.lock_token.is_none());
    }

    #[tokio::test]
    async fn force_release_clears_stale_lock() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        assert!(!store.force_release(1, now).await.unwrap());
        store
            .try_acquire_lock(1, "stuck", now + Duration::hours(1), now)
            .await
            .unwrap();
        assert!(store.force_release(1, now).await.unwrap());
        assert!(store.try_acquire_lock(1, "next", now + Duration::hours(1), now).await.unwrap());
    }
}
