//! PostgreSQL state store.
//!
//! Persists batches, proof attempts and indexer cursors. Uses `sqlx` with a
//! connection pool; the run lock is a single conditional upsert and the
//! verified-range update runs in one transaction.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! proofindex-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `batches` — canonical per-batch state (one row per batch id)
//! - `batch_proofs` — one row per `(batch_id, proof_tx)`
//! - `indexer_cursors` — checkpoint, run lock and last-run bookkeeping per chain

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use proofindex_core::cursor::{truncate_error, IndexerCursor, RunStatus};
use proofindex_core::error::IndexerError;
use proofindex_core::store::StateStore;
use proofindex_core::types::{
    Batch, BatchProof, BatchStatus, ProofOutcome, ProofSystem, Proposal, Transition, Verification,
};

// ─── Connection options ────────────────────────────────────────────────────────

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 5)
    pub max_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout_secs: 30,
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS batches (
        batch_id            BIGINT  PRIMARY KEY,
        proposer            TEXT,
        proposed_at         BIGINT,
        proposed_block      BIGINT,
        proposed_tx         TEXT,
        proof_tx            TEXT,
        verifier            TEXT,
        proof_systems       TEXT[]  NOT NULL DEFAULT '{}',
        proof_variants      TEXT[]  NOT NULL DEFAULT '{}',
        parent_hash         TEXT,
        block_hash          TEXT,
        state_root          TEXT,
        proven_at           BIGINT,
        proven_block        BIGINT,
        verified_at         BIGINT,
        verified_block      BIGINT,
        verified_tx         TEXT,
        verified_block_hash TEXT,
        status              TEXT    NOT NULL,
        is_contested        BOOLEAN NOT NULL DEFAULT FALSE,
        is_legacy           BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_batches_verified_block ON batches (verified_block)",
    "CREATE INDEX IF NOT EXISTS idx_batches_status ON batches (status, batch_id DESC)",
    "CREATE TABLE IF NOT EXISTS batch_proofs (
        batch_id       BIGINT  NOT NULL,
        proof_tx       TEXT    NOT NULL,
        verifier       TEXT    NOT NULL,
        proof_systems  TEXT[]  NOT NULL DEFAULT '{}',
        proof_variants TEXT[]  NOT NULL DEFAULT '{}',
        parent_hash    TEXT    NOT NULL,
        block_hash     TEXT    NOT NULL,
        state_root     TEXT    NOT NULL,
        proven_at      BIGINT  NOT NULL,
        proven_block   BIGINT  NOT NULL,
        is_verified    BOOLEAN NOT NULL DEFAULT FALSE,
        PRIMARY KEY (batch_id, proof_tx)
    )",
    "CREATE INDEX IF NOT EXISTS idx_batch_proofs_proven_block ON batch_proofs (proven_block)",
    "CREATE TABLE IF NOT EXISTS indexer_cursors (
        chain_id             BIGINT PRIMARY KEY,
        last_processed_block BIGINT,
        lock_token           TEXT,
        lock_expires_at      TIMESTAMPTZ,
        last_run_status      TEXT,
        last_error           TEXT,
        last_run_started_at  TIMESTAMPTZ,
        last_run_finished_at TIMESTAMPTZ,
        updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
];

// ─── PostgresStateStore ───────────────────────────────────────────────────────

/// PostgreSQL-backed `StateStore`. Cheap to clone; wraps a pool.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

impl PostgresStateStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, IndexerError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, IndexerError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStateStore connected and schema initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
        }
        debug!("PostgresStateStore schema initialized");
        Ok(())
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn systems_to_db(systems: &[ProofSystem]) -> Vec<String> {
    systems.iter().map(|s| s.as_str().to_string()).collect()
}

fn systems_from_db(raw: Vec<String>) -> Vec<ProofSystem> {
    raw.iter().filter_map(|s| s.parse().ok()).collect()
}

fn opt_u64(row: &PgRow, col: &str) -> Result<Option<u64>, IndexerError> {
    Ok(row.try_get::<Option<i64>, _>(col).map_err(db_err)?.map(|v| v as u64))
}

fn batch_from_row(row: &PgRow) -> Result<Batch, IndexerError> {
    let get_s = |col: &str| row.try_get::<Option<String>, _>(col).map_err(db_err);

    let proposal = match (get_s("proposer")?, get_s("proposed_tx")?) {
        (Some(proposer), Some(proposed_tx)) => Some(Proposal {
            proposer,
            proposed_at: row.try_get::<Option<i64>, _>("proposed_at").map_err(db_err)?.unwrap_or(0),
            proposed_block: opt_u64(row, "proposed_block")?.unwrap_or(0),
            proposed_tx,
        }),
        _ => None,
    };

    let proof = match (get_s("proof_tx")?, opt_u64(row, "proven_block")?) {
        (Some(tx_hash), Some(proven_block)) => Some(ProofOutcome {
            tx_hash,
            verifier: get_s("verifier")?.unwrap_or_default(),
            proof_systems: systems_from_db(row.try_get("proof_systems").map_err(db_err)?),
            variants: row.try_get("proof_variants").map_err(db_err)?,
            transition: Transition {
                parent_hash: get_s("parent_hash")?.unwrap_or_default(),
                block_hash: get_s("block_hash")?.unwrap_or_default(),
                state_root: get_s("state_root")?.unwrap_or_default(),
            },
            proven_at: row.try_get::<Option<i64>, _>("proven_at").map_err(db_err)?.unwrap_or(0),
            proven_block,
        }),
        _ => None,
    };

    let verification = match (opt_u64(row, "verified_block")?, get_s("verified_tx")?) {
        (Some(verified_block), Some(verified_tx)) => Some(Verification {
            verified_at: row.try_get::<Option<i64>, _>("verified_at").map_err(db_err)?.unwrap_or(0),
            verified_block,
            verified_tx,
            block_hash: get_s("verified_block_hash")?,
        }),
        _ => None,
    };

    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Batch {
        batch_id: row.try_get::<i64, _>("batch_id").map_err(db_err)? as u64,
        proposal,
        proof,
        verification,
        status: status.parse::<BatchStatus>().map_err(IndexerError::Storage)?,
        is_contested: row.try_get("is_contested").map_err(db_err)?,
        is_legacy: row.try_get("is_legacy").map_err(db_err)?,
    })
}

fn proof_from_row(row: &PgRow) -> Result<BatchProof, IndexerError> {
    Ok(BatchProof {
        batch_id: row.try_get::<i64, _>("batch_id").map_err(db_err)? as u64,
        outcome: ProofOutcome {
            tx_hash: row.try_get("proof_tx").map_err(db_err)?,
            verifier: row.try_get("verifier").map_err(db_err)?,
            proof_systems: systems_from_db(row.try_get("proof_systems").map_err(db_err)?),
            variants: row.try_get("proof_variants").map_err(db_err)?,
            transition: Transition {
                parent_hash: row.try_get("parent_hash").map_err(db_err)?,
                block_hash: row.try_get("block_hash").map_err(db_err)?,
                state_root: row.try_get("state_root").map_err(db_err)?,
            },
            proven_at: row.try_get("proven_at").map_err(db_err)?,
            proven_block: row.try_get::<i64, _>("proven_block").map_err(db_err)? as u64,
        },
        is_verified: row.try_get("is_verified").map_err(db_err)?,
    })
}

fn cursor_from_row(row: &PgRow) -> Result<IndexerCursor, IndexerError> {
    let status: Option<String> = row.try_get("last_run_status").map_err(db_err)?;
    Ok(IndexerCursor {
        chain_id: row.try_get::<i64, _>("chain_id").map_err(db_err)? as u64,
        last_processed_block: opt_u64(row, "last_processed_block")?,
        lock_token: row.try_get("lock_token").map_err(db_err)?,
        lock_expires_at: row.try_get("lock_expires_at").map_err(db_err)?,
        last_run_status: status
            .map(|s| s.parse::<RunStatus>())
            .transpose()
            .map_err(IndexerError::Storage)?,
        last_error: row.try_get("last_error").map_err(db_err)?,
        last_run_started_at: row.try_get("last_run_started_at").map_err(db_err)?,
        last_run_finished_at: row.try_get("last_run_finished_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

// ─── StateStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn cursor(&self, chain_id: u64) -> Result<Option<IndexerCursor>, IndexerError> {
        let row = sqlx::query("SELECT * FROM indexer_cursors WHERE chain_id = $1")
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(cursor_from_row).transpose()
    }

    async fn try_acquire_lock(
        &self,
        chain_id: u64,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT INTO indexer_cursors
                (chain_id, lock_token, lock_expires_at, last_run_status, last_error,
                 last_run_started_at, updated_at)
             VALUES ($1, $2, $3, 'running', NULL, $4, $4)
             ON CONFLICT (chain_id) DO UPDATE SET
                lock_token          = EXCLUDED.lock_token,
                lock_expires_at     = EXCLUDED.lock_expires_at,
                last_run_status     = 'running',
                last_error          = NULL,
                last_run_started_at = EXCLUDED.last_run_started_at,
                updated_at          = EXCLUDED.updated_at
             WHERE indexer_cursors.lock_token IS NULL
                OR indexer_cursors.lock_expires_at IS NULL
                OR indexer_cursors.lock_expires_at <= $4",
        )
        .bind(chain_id as i64)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn checkpoint(
        &self,
        chain_id: u64,
        token: &str,
        block: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let result = sqlx::query(
            "UPDATE indexer_cursors
             SET last_processed_block = $3, lock_expires_at = $4, updated_at = $5
             WHERE chain_id = $1 AND lock_token = $2 AND lock_expires_at > $5",
        )
        .bind(chain_id as i64)
        .bind(token)
        .bind(block as i64)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(IndexerError::LockLost {
                chain_id,
                token: token.to_string(),
            });
        }
        Ok(())
    }

    async fn release_lock(
        &self,
        chain_id: u64,
        token: &str,
        status: RunStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let result = sqlx::query(
            "UPDATE indexer_cursors
             SET lock_token = NULL, lock_expires_at = NULL, last_run_status = $3,
                 last_error = $4, last_run_finished_at = $5, updated_at = $5
             WHERE chain_id = $1 AND lock_token = $2",
        )
        .bind(chain_id as i64)
        .bind(token)
        .bind(status.as_str())
        .bind(error.map(truncate_error))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            tracing::warn!(chain_id, token, "lock already released or taken over");
        }
        Ok(())
    }

    async fn force_release(&self, chain_id: u64, now: DateTime<Utc>) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "UPDATE indexer_cursors
             SET lock_token = NULL, lock_expires_at = NULL, last_run_status = 'failed',
                 last_error = 'lock force-released', last_run_finished_at = $2, updated_at = $2
             WHERE chain_id = $1 AND lock_token IS NOT NULL",
        )
        .bind(chain_id as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn batch(&self, batch_id: u64) -> Result<Option<Batch>, IndexerError> {
        let row = sqlx::query("SELECT * FROM batches WHERE batch_id = $1")
            .bind(batch_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn upsert_batch(&self, batch: &Batch) -> Result<(), IndexerError> {
        let proposal = batch.proposal.as_ref();
        let proof = batch.proof.as_ref();
        let verification = batch.verification.as_ref();

        sqlx::query(
            "INSERT INTO batches (
                batch_id, proposer, proposed_at, proposed_block, proposed_tx,
                proof_tx, verifier, proof_systems, proof_variants,
                parent_hash, block_hash, state_root, proven_at, proven_block,
                verified_at, verified_block, verified_tx, verified_block_hash,
                status, is_contested, is_legacy, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17, $18, $19, $20, $21, NOW())
             ON CONFLICT (batch_id) DO UPDATE SET
                proposer = EXCLUDED.proposer,
                proposed_at = EXCLUDED.proposed_at,
                proposed_block = EXCLUDED.proposed_block,
                proposed_tx = EXCLUDED.proposed_tx,
                proof_tx = EXCLUDED.proof_tx,
                verifier = EXCLUDED.verifier,
                proof_systems = EXCLUDED.proof_systems,
                proof_variants = EXCLUDED.proof_variants,
                parent_hash = EXCLUDED.parent_hash,
                block_hash = EXCLUDED.block_hash,
                state_root = EXCLUDED.state_root,
                proven_at = EXCLUDED.proven_at,
                proven_block = EXCLUDED.proven_block,
                verified_at = EXCLUDED.verified_at,
                verified_block = EXCLUDED.verified_block,
                verified_tx = EXCLUDED.verified_tx,
                verified_block_hash = EXCLUDED.verified_block_hash,
                status = EXCLUDED.status,
                is_contested = EXCLUDED.is_contested,
                is_legacy = EXCLUDED.is_legacy,
                updated_at = NOW()",
        )
        .bind(batch.batch_id as i64)
        .bind(proposal.map(|p| p.proposer.clone()))
        .bind(proposal.map(|p| p.proposed_at))
        .bind(proposal.map(|p| p.proposed_block as i64))
        .bind(proposal.map(|p| p.proposed_tx.clone()))
        .bind(proof.map(|p| p.tx_hash.clone()))
        .bind(proof.map(|p| p.verifier.clone()))
        .bind(proof.map(|p| systems_to_db(&p.proof_systems)).unwrap_or_default())
        .bind(proof.map(|p| p.variants.clone()).unwrap_or_default())
        .bind(proof.map(|p| p.transition.parent_hash.clone()))
        .bind(proof.map(|p| p.transition.block_hash.clone()))
        .bind(proof.map(|p| p.transition.state_root.clone()))
        .bind(proof.map(|p| p.proven_at))
        .bind(proof.map(|p| p.proven_block as i64))
        .bind(verification.map(|v| v.verified_at))
        .bind(verification.map(|v| v.verified_block as i64))
        .bind(verification.map(|v| v.verified_tx.clone()))
        .bind(verification.and_then(|v| v.block_hash.clone()))
        .bind(batch.status.as_str())
        .bind(batch.is_contested)
        .bind(batch.is_legacy)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_batch(&self, batch_id: u64) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM batches WHERE batch_id = $1")
            .bind(batch_id as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn batches_verified_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<Batch>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM batches WHERE verified_block BETWEEN $1 AND $2 ORDER BY batch_id",
        )
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn last_verified_batch_before(&self, block: u64) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MAX(batch_id) AS id FROM batches WHERE verified_block < $1")
            .bind(block as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        opt_u64(&row, "id")
    }

    async fn mark_verified_range(
        &self,
        first: u64,
        last: u64,
        verification: &Verification,
    ) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "UPDATE batches
             SET verified_at = $3, verified_block = $4, verified_tx = $5,
                 verified_block_hash = $6, status = 'verified', updated_at = NOW()
             WHERE batch_id BETWEEN $1 AND $2",
        )
        .bind(first as i64)
        .bind(last as i64)
        .bind(verification.verified_at)
        .bind(verification.verified_block as i64)
        .bind(&verification.verified_tx)
        .bind(verification.block_hash.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let inserted = sqlx::query(
            "INSERT INTO batches
                (batch_id, verified_at, verified_block, verified_tx, verified_block_hash,
                 status, is_legacy, updated_at)
             SELECT g, $3, $4, $5, $6, 'verified', TRUE, NOW()
             FROM generate_series($1::BIGINT, $2::BIGINT) AS g
             ON CONFLICT (batch_id) DO NOTHING",
        )
        .bind(first as i64)
        .bind(last as i64)
        .bind(verification.verified_at)
        .bind(verification.verified_block as i64)
        .bind(&verification.verified_tx)
        .bind(verification.block_hash.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit verified range: {e}")))?;
        Ok(inserted.rows_affected())
    }

    async fn upsert_proof(&self, proof: &BatchProof) -> Result<(), IndexerError> {
        let o = &proof.outcome;
        sqlx::query(
            "INSERT INTO batch_proofs (
                batch_id, proof_tx, verifier, proof_systems, proof_variants,
                parent_hash, block_hash, state_root, proven_at, proven_block, is_verified)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (batch_id, proof_tx) DO UPDATE SET
                verifier = EXCLUDED.verifier,
                proof_systems = EXCLUDED.proof_systems,
                proof_variants = EXCLUDED.proof_variants,
                parent_hash = EXCLUDED.parent_hash,
                block_hash = EXCLUDED.block_hash,
                state_root = EXCLUDED.state_root,
                proven_at = EXCLUDED.proven_at,
                proven_block = EXCLUDED.proven_block,
                is_verified = EXCLUDED.is_verified",
        )
        .bind(proof.batch_id as i64)
        .bind(&o.tx_hash)
        .bind(&o.verifier)
        .bind(systems_to_db(&o.proof_systems))
        .bind(&o.variants)
        .bind(&o.transition.parent_hash)
        .bind(&o.transition.block_hash)
        .bind(&o.transition.state_root)
        .bind(o.proven_at)
        .bind(o.proven_block as i64)
        .bind(proof.is_verified)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn proofs_for_batch(&self, batch_id: u64) -> Result<Vec<BatchProof>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM batch_proofs WHERE batch_id = $1 ORDER BY proof_tx")
            .bind(batch_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(proof_from_row).collect()
    }

    async fn delete_proofs_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<BatchProof>, IndexerError> {
        let rows =
            sqlx::query("DELETE FROM batch_proofs WHERE proven_block BETWEEN $1 AND $2 RETURNING *")
                .bind(from as i64)
                .bind(to as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        rows.iter().map(proof_from_row).collect()
    }

    async fn set_verified_proof(
        &self,
        batch_id: u64,
        tx_hash: Option<&str>,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "UPDATE batch_proofs SET is_verified = COALESCE(proof_tx = $2, FALSE)
             WHERE batch_id = $1",
        )
        .bind(batch_id as i64)
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
