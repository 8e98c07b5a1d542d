//! `StateStore`: durable tables the indexer writes.
//!
//! Implementations: `InMemoryStateStore` and `PostgresStateStore` in
//! `proofindex-storage`. Every write is an idempotent upsert keyed by a
//! natural identifier (batch id, `(batch id, proof tx hash)`, chain id), so a
//! crashed run can re-apply the same logs safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cursor::{IndexerCursor, RunStatus};
use crate::error::IndexerError;
use crate::types::{Batch, BatchProof, Verification};

#[async_trait]
pub trait StateStore: Send + Sync {
    // ─── Cursor / lock ───────────────────────────────────────────────────────

    /// Load the cursor row for a chain.
    async fn cursor(&self, chain_id: u64) -> Result<Option<IndexerCursor>, IndexerError>;

    /// Atomically take the run lock if it is absent or expired.
    ///
    /// Returns `Ok(false)` on contention; that is not an error.
    async fn try_acquire_lock(
        &self,
        chain_id: u64,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, IndexerError>;

    /// Persist `block` as the last processed block and extend the lock.
    ///
    /// Fails with [`IndexerError::LockLost`] if `token` no longer holds a live lock.
    async fn checkpoint(
        &self,
        chain_id: u64,
        token: &str,
        block: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError>;

    /// Clear the lock held by `token` and record the run outcome.
    async fn release_lock(
        &self,
        chain_id: u64,
        token: &str,
        status: RunStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError>;

    /// Clear whatever lock is present (operator override). Returns `true` if a
    /// lock was cleared.
    async fn force_release(&self, chain_id: u64, now: DateTime<Utc>) -> Result<bool, IndexerError>;

    // ─── Batches ─────────────────────────────────────────────────────────────

    async fn batch(&self, batch_id: u64) -> Result<Option<Batch>, IndexerError>;

    /// Insert or fully replace the row for `batch.batch_id`.
    async fn upsert_batch(&self, batch: &Batch) -> Result<(), IndexerError>;

    async fn delete_batch(&self, batch_id: u64) -> Result<(), IndexerError>;

    /// Batches whose verification happened in `[from, to]`.
    async fn batches_verified_in_range(&self, from: u64, to: u64)
        -> Result<Vec<Batch>, IndexerError>;

    /// Highest batch id verified at a block strictly below `block`.
    async fn last_verified_batch_before(&self, block: u64) -> Result<Option<u64>, IndexerError>;

    /// Mark every id in `[first, last]` verified with `verification`, creating
    /// legacy rows for ids never seen. Returns the number of rows synthesized.
    async fn mark_verified_range(
        &self,
        first: u64,
        last: u64,
        verification: &Verification,
    ) -> Result<u64, IndexerError>;

    // ─── Proofs ──────────────────────────────────────────────────────────────

    /// Insert or refresh the row keyed by `(batch_id, tx_hash)`.
    async fn upsert_proof(&self, proof: &BatchProof) -> Result<(), IndexerError>;

    async fn proofs_for_batch(&self, batch_id: u64) -> Result<Vec<BatchProof>, IndexerError>;

    /// Delete proofs whose `proven_block` lies in `[from, to]`; returns them.
    async fn delete_proofs_in_range(&self, from: u64, to: u64)
        -> Result<Vec<BatchProof>, IndexerError>;

    /// Flag exactly the proof `tx_hash` of `batch_id` as verified (clearing the
    /// flag on its siblings). `None` clears the flag on all of them.
    async fn set_verified_proof(
        &self,
        batch_id: u64,
        tx_hash: Option<&str>,
    ) -> Result<(), IndexerError>;
}
